use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;

/// Encode a uniformly filled luminance image as PNG.
pub(crate) fn gray_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    encode_png(GrayImage::from_pixel(width, height, Luma([value])))
}

pub(crate) fn encode_png(image: GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
