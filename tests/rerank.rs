use std::collections::HashMap;

use furnsearch::index::Neighbor;
use furnsearch::rerank::geom_check;

fn candidates(ids: &[&str]) -> Vec<Neighbor> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| Neighbor { id: id.to_string(), distance: i as f32 * 0.1 })
        .collect()
}

fn verifier(inliers: &[(&str, usize)]) -> impl Fn(&Neighbor) -> Result<usize, String> + Sync {
    let inliers = inliers.iter().map(|(id, n)| (id.to_string(), *n)).collect::<HashMap<_, _>>();
    move |c: &Neighbor| inliers.get(&c.id).copied().ok_or_else(|| format!("{} 无法读取", c.id))
}

fn ids(result: &[furnsearch::rerank::RankedMatch]) -> Vec<&str> {
    result.iter().map(|m| m.id.as_str()).collect()
}

#[test]
fn sorted_by_inliers() {
    let c = candidates(&["a", "b", "c", "d"]);
    let result = geom_check(&c, 3, 6, verifier(&[("a", 3), ("b", 40), ("c", 12), ("d", 7)]));
    assert_eq!(ids(&result), ["b", "c", "d"]);
    assert_eq!(result[0].inliers, 40);
    // 保留原始距离
    assert!((result[0].distance - 0.1).abs() < 1e-6);
}

#[test]
fn backfill_in_original_order() {
    let c = candidates(&["a", "b", "c", "d"]);
    let result = geom_check(&c, 3, 6, verifier(&[("a", 0), ("b", 0), ("c", 9), ("d", 0)]));
    assert_eq!(ids(&result), ["c", "a", "b"]);
    assert_eq!(result.iter().map(|m| m.inliers).collect::<Vec<_>>(), [9, 0, 0]);
}

#[test]
fn failed_candidate_counts_as_zero() {
    let c = candidates(&["a", "missing", "b"]);
    let result = geom_check(&c, 2, 6, verifier(&[("a", 0), ("b", 20)]));
    assert_eq!(ids(&result), ["b", "a"]);
}
