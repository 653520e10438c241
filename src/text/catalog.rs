use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 商品目录中的一项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
    /// 商品图片路径，相对于数据目录，可以为空
    #[serde(default)]
    pub img: String,
}

impl CatalogItem {
    /// 用于文本向量化的文档：描述、类型、名称、颜色
    pub fn document(&self) -> String {
        format!("{} {} {} {}", self.desc, self.kind, self.name, self.color)
    }
}

/// 有序的商品目录
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    positions: HashMap<String, usize>,
}

impl Catalog {
    /// 重复的 ID 以最后一次出现为准，保留第一次出现的位置
    pub fn new(items: Vec<CatalogItem>) -> Self {
        let mut catalog = Self::default();
        for item in items {
            match catalog.positions.get(&item.id) {
                Some(&i) => catalog.items[i] = item,
                None => {
                    catalog.positions.insert(item.id.clone(), catalog.items.len());
                    catalog.items.push(item);
                }
            }
        }
        catalog
    }

    /// 读取 JSON 数组格式的商品目录
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let items: Vec<CatalogItem> = serde_json::from_reader(reader)?;
        let catalog = Self::new(items);
        info!("从 {} 加载 {} 件商品", path.display(), catalog.len());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.positions.get(id).map(|&i| &self.items[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }
}
