use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;
use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// word2vec 词向量，词为商品 ID
#[derive(Debug, Clone)]
pub struct WordVectors {
    words: Vec<String>,
    positions: HashMap<String, usize>,
    /// 每行为单位向量
    vectors: Array2<f32>,
}

impl WordVectors {
    /// 从词和向量构建，向量会被归一化为单位长度
    pub fn new(entries: Vec<(String, Vec<f32>)>) -> Result<Self> {
        let dim = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut vectors = Array2::zeros((entries.len(), dim));
        let mut words = Vec::with_capacity(entries.len());
        let mut positions = HashMap::new();
        for (i, (word, vector)) in entries.into_iter().enumerate() {
            if vector.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: vector.len() });
            }
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            let mut row = vectors.row_mut(i);
            row.assign(&Array1::from(vector));
            if norm > 0.0 {
                row /= norm;
            }
            positions.insert(word.clone(), i);
            words.push(word);
        }
        Ok(Self { words, positions, vectors })
    }

    /// 读取文本格式的模型，首行为 `<词数> <维度>`
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header = lines.next().transpose()?.unwrap_or_default();
        let (count, dim) = parse_header(&header)?;

        let mut entries = Vec::with_capacity(count);
        for (lineno, line) in lines.enumerate() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let vector = parts
                .map(|x| x.parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Parse(format!("{} 第 {} 行: {}", path.display(), lineno + 2, e)))?;
            if vector.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: vector.len() });
            }
            entries.push((word.to_string(), vector));
        }
        info!("从 {} 加载 {} 个词向量（{} 维）", path.display(), entries.len(), dim);
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.positions.contains_key(word)
    }

    /// 余弦相似度最高的 `topn` 个词，不包含自身；未知的词返回 `None`
    pub fn most_similar(&self, word: &str, topn: usize) -> Option<Vec<(String, f32)>> {
        let &pos = self.positions.get(word)?;
        let sims = self.vectors.dot(&self.vectors.row(pos));
        let mut result = sims
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != pos)
            .map(|(i, &s)| (i, s))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| b.1.total_cmp(&a.1));
        result.truncate(topn);
        Some(result.into_iter().map(|(i, s)| (self.words[i].clone(), s)).collect())
    }
}

fn parse_header(header: &str) -> Result<(usize, usize)> {
    let parts = header.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        [count, dim] => {
            let count = count.parse().map_err(|_| Error::Parse(format!("无效的文件头: {header}")))?;
            let dim = dim.parse().map_err(|_| Error::Parse(format!("无效的文件头: {header}")))?;
            Ok((count, dim))
        }
        _ => Err(Error::Parse(format!("无效的文件头: {header}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_and_most_similar() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "4 2").unwrap();
        writeln!(file, "A 1.0 0.0").unwrap();
        writeln!(file, "B 0.9 0.1").unwrap();
        writeln!(file, "C 0.0 1.0").unwrap();
        writeln!(file, "D 2.0 0.5").unwrap();
        file.flush().unwrap();

        let wv = WordVectors::load(file.path()).unwrap();
        assert_eq!(wv.len(), 4);
        let similar = wv.most_similar("A", 2).unwrap();
        let words = similar.iter().map(|(w, _)| w.as_str()).collect::<Vec<_>>();
        assert_eq!(words, vec!["B", "D"]);
        assert!(wv.most_similar("Z", 2).is_none());
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 3").unwrap();
        writeln!(file, "A 1.0 0.0").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            WordVectors::load(file.path()),
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }
}
