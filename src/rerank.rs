use std::collections::HashSet;

use log::{debug, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::index::Neighbor;

/// 重排后的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    pub id: String,
    /// 视觉搜索的原始距离
    pub distance: f32,
    /// 几何校验的内点数量，补齐的结果为 0
    pub inliers: usize,
}

impl RankedMatch {
    fn unverified(neighbor: &Neighbor) -> Self {
        Self { id: neighbor.id.clone(), distance: neighbor.distance, inliers: 0 }
    }
}

/// 用几何校验对初始结果重新排序
///
/// - `nb_best` 超过 `max_matches` 时不做校验，原样返回
/// - 只保留内点数量大于 0 的候选
/// - 不足 `nb_best` 个时，按原始顺序补齐尚未出现的候选
/// - 按内点数量降序稳定排序，截取前 `nb_best` 个
///
/// 单个候选校验失败（如图片无法读取）视为 0 个内点
pub fn geom_check<V, E>(
    candidates: &[Neighbor],
    nb_best: usize,
    max_matches: usize,
    verify: V,
) -> Vec<RankedMatch>
where
    V: Fn(&Neighbor) -> Result<usize, E> + Sync,
    E: std::fmt::Display,
{
    if nb_best > max_matches {
        debug!("nb_best {nb_best} 超过上限 {max_matches}，跳过几何校验");
        return candidates.iter().map(RankedMatch::unverified).collect();
    }

    let inliers = candidates
        .par_iter()
        .map(|c| match verify(c) {
            Ok(n) => n,
            Err(e) => {
                warn!("几何校验 {} 失败: {}", c.id, e);
                0
            }
        })
        .collect::<Vec<_>>();

    let mut result = candidates
        .iter()
        .zip(&inliers)
        .filter(|(_, n)| **n > 0)
        .map(|(c, &n)| RankedMatch { id: c.id.clone(), distance: c.distance, inliers: n })
        .collect::<Vec<_>>();

    if result.len() < nb_best {
        let mut seen = result.iter().map(|m| m.id.clone()).collect::<HashSet<_>>();
        for c in candidates {
            if result.len() >= nb_best {
                break;
            }
            if seen.insert(c.id.clone()) {
                result.push(RankedMatch::unverified(c));
            }
        }
    }

    result.sort_by(|a, b| b.inliers.cmp(&a.inliers));
    result.truncate(nb_best);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(ids: &[&str]) -> Vec<Neighbor> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Neighbor { id: id.to_string(), distance: i as f32 })
            .collect()
    }

    #[test]
    fn test_skip_when_over_budget() {
        let c = candidates(&["a", "b"]);
        let result = geom_check(&c, 7, 6, |_| -> Result<usize, String> { panic!("不应校验") });
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|m| m.inliers == 0));
    }

    #[test]
    fn test_rerank_by_inliers() {
        let c = candidates(&["a", "b", "c", "d"]);
        let result = geom_check(&c, 3, 6, |n| -> Result<usize, String> {
            Ok(match n.id.as_str() {
                "a" => 3,
                "b" => 0,
                "c" => 12,
                _ => 3,
            })
        });
        let ids = result.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        // 相同内点数量保持原始顺序
        assert_eq!(ids, vec!["c", "a", "d"]);
    }

    #[test]
    fn test_backfill_skips_duplicates() {
        let c = candidates(&["a", "b", "c", "d"]);
        let result = geom_check(&c, 3, 6, |n| -> Result<usize, String> {
            match n.id.as_str() {
                "a" => Ok(9),
                "c" => Err("无法读取".to_string()),
                _ => Ok(0),
            }
        });
        let ids = result.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(result[1].inliers, 0);
    }
}
