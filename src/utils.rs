use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use regex::Regex;
use walkdir::WalkDir;

/// 进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("invalid progress bar template")
}

/// 先写入临时文件，再重命名到目标路径，避免写入中断导致文件损坏
pub fn atomic_write<P, F>(path: P, write: F) -> std::io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_file = path.as_os_str().to_owned();
    tmp_file.push(".tmp");
    let tmp_file = PathBuf::from(tmp_file);

    let mut writer = BufWriter::new(File::create(&tmp_file)?);
    write(&mut writer)?;
    writer.flush()?;
    drop(writer);

    std::fs::rename(&tmp_file, path)
}

/// 缓存使用的键：文件名（不含目录）
pub fn cache_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// 根据逗号分隔的后缀名构建匹配正则
pub fn suffix_regex(suffix: &str) -> Regex {
    let alternatives = suffix.split(',').map(|s| regex::escape(s.trim())).collect::<Vec<_>>();
    let re = format!("(?i)^({})$", alternatives.join("|"));
    Regex::new(&re).expect("failed to build regex")
}

/// 列出目录下（不递归）所有匹配后缀的文件，按文件名排序
pub fn list_images(dir: &Path, suffix: &Regex) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().map(|ext| suffix.is_match(&ext.to_string_lossy())) == Some(true)
        })
        .collect()
}

/// 计算数据的 blake3 哈希，返回十六进制字符串
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// 余弦距离，任意一方为零向量时返回 1
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}
