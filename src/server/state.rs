use std::sync::Arc;

use crate::finder::Finder;

/// 应用状态
pub struct AppState {
    /// 搜索编排器，内部的索引和缓存自带锁
    pub finder: Finder,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(finder: Finder) -> Arc<Self> {
        Arc::new(AppState { finder })
    }
}
