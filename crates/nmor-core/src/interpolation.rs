use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};

/// Interpolation used when sampling a grid at displaced positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationOrder {
    Nearest,
    #[default]
    Linear,
}

/// Bilinear (or nearest) warping of a multi-channel 2D grid.
///
/// # Arguments
/// * `field` - Input grid [C, H, W]
/// * `displacement` - Displacement [2, H, W] in index coordinates (row, column)
/// * `order` - Interpolation order
///
/// # Returns
/// * Warped grid [C, H, W] with `out(i, j) = field(i + d0(i, j), j + d1(i, j))`.
///   Sample positions outside the grid are clamped to the border.
pub fn warp_channels<B: Backend>(
    field: Tensor<B, 3>,
    displacement: Tensor<B, 3>,
    order: InterpolationOrder,
) -> Tensor<B, 3> {
    let [c, h, w] = field.dims();
    let device = field.device();

    let d0 = displacement.clone().slice([0..1, 0..h, 0..w]).reshape([h, w]);
    let d1 = displacement.slice([1..2, 0..h, 0..w]).reshape([h, w]);

    // Row coords: [H, 1], column coords: [1, W]
    let rows = Tensor::<B, 1, Int>::arange(0..h as i64, &device)
        .float()
        .reshape([h, 1]);
    let cols = Tensor::<B, 1, Int>::arange(0..w as i64, &device)
        .float()
        .reshape([1, w]);

    let y = (d0 + rows).clamp(0.0, (h - 1) as f32);
    let x = (d1 + cols).clamp(0.0, (w - 1) as f32);

    // Flatten once: [C, H*W]
    let flat = field.reshape([c, h * w]);
    let stride = w as i32;

    let gather = |row: Tensor<B, 2, Int>, col: Tensor<B, 2, Int>| -> Tensor<B, 3> {
        let idx = (row.mul_scalar(stride) + col)
            .reshape([1, h * w])
            .repeat(&[c, 1]);
        flat.clone().gather(1, idx).reshape([c, h, w])
    };

    match order {
        InterpolationOrder::Nearest => {
            let yi = y.add_scalar(0.5).floor().clamp(0.0, (h - 1) as f32).int();
            let xi = x.add_scalar(0.5).floor().clamp(0.0, (w - 1) as f32).int();
            gather(yi, xi)
        }
        InterpolationOrder::Linear => {
            let y0 = y.clone().floor();
            let x0 = x.clone().floor();

            // Weights, broadcast over channels
            let wy1 = (y - y0.clone()).reshape([1, h, w]).repeat(&[c, 1, 1]);
            let wy0 = wy1.clone().neg().add_scalar(1.0);
            let wx1 = (x - x0.clone()).reshape([1, h, w]).repeat(&[c, 1, 1]);
            let wx0 = wx1.clone().neg().add_scalar(1.0);

            let y1i = y0.clone().add_scalar(1.0).clamp(0.0, (h - 1) as f32).int();
            let x1i = x0.clone().add_scalar(1.0).clamp(0.0, (w - 1) as f32).int();
            let y0i = y0.int();
            let x0i = x0.int();

            let v00 = gather(y0i.clone(), x0i.clone());
            let v01 = gather(y0i, x1i.clone());
            let v10 = gather(y1i.clone(), x0i);
            let v11 = gather(y1i, x1i);

            // Interpolate along columns, then rows
            let top = v00 * wx0.clone() + v01 * wx1.clone();
            let bottom = v10 * wx0 + v11 * wx1;
            top * wy0 + bottom * wy1
        }
    }
}
