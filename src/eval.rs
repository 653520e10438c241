//! 用标注数据评估搜索准确率

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// 场景图片名 → 正确的商品图片名
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    products: HashMap<String, String>,
}

impl GroundTruth {
    /// 读取 `场景;商品` 格式的标注文件，`reverse` 为 true 时列顺序为 `商品;场景`
    pub fn load(path: &Path, reverse: bool) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?, reverse)
    }

    pub fn parse(text: &str, reverse: bool) -> Result<Self> {
        let mut products = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((first, second)) = line.split_once(';') else {
                return Err(Error::Parse(format!("第 {} 行: {}", lineno + 1, line)));
            };
            let (first, second) = (first.trim().to_string(), second.trim().to_string());
            match reverse {
                false => products.insert(first, second),
                true => products.insert(second, first),
            };
        }
        Ok(Self { products })
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, query: &str) -> Option<&str> {
        self.products.get(query).map(String::as_str)
    }

    /// 任意一个结果与标注一致即为正确，没有标注的查询视为错误
    pub fn is_correct<'a>(&self, query: &str, results: impl IntoIterator<Item = &'a str>) -> bool {
        match self.get(query) {
            Some(expected) => results.into_iter().any(|r| r == expected),
            None => false,
        }
    }
}

/// 累计准确率
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy {
    pub total: usize,
    pub correct: usize,
}

impl Accuracy {
    pub fn record(&mut self, correct: bool) {
        self.total += 1;
        self.correct += correct as usize;
    }

    /// 0 ~ 1，没有样本时为 0
    pub fn value(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.correct as f64 / total as f64,
        }
    }
}
