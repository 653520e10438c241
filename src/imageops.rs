use std::fs;
use std::path::Path;

use image::ImageReader;
use log::debug;

use crate::detect::CropRegion;
use crate::error::{Error, Result};

fn image_error(path: &Path) -> impl FnOnce(image::ImageError) -> Error + '_ {
    move |source| Error::Image { path: path.to_path_buf(), source }
}

/// 只读取图片头获取宽高
pub fn dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path).map_err(image_error(path))
}

/// 裁剪图片并保存，输出格式由扩展名决定
pub fn crop_to(src: &Path, region: CropRegion, dst: &Path) -> Result<()> {
    let img = ImageReader::open(src)?
        .with_guessed_format()?
        .decode()
        .map_err(image_error(src))?;
    let cropped = img.crop_imm(region.x, region.y, region.width, region.height);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    cropped.save(dst).map_err(image_error(dst))?;
    debug!(
        "裁剪 {} ({}, {}, {}x{}) -> {}",
        src.display(),
        region.x,
        region.y,
        region.width,
        region.height,
        dst.display()
    );
    Ok(())
}
