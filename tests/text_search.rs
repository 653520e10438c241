use std::fs;

use furnsearch::text::{
    Association, Catalog, Closest, TextSearchEngine, WordVectors, resolve_text_query,
};
use rstest::*;

const CATALOG: &str = r#"[
    {"id": "A", "desc": "Red chair with armrests", "type": "chair", "img": "images/chair/a.jpg"},
    {"id": "B", "desc": "Blue corner sofa", "type": "sofa", "img": "images/sofa/b.jpg"},
    {"id": "C", "desc": "Green plant pot", "type": "pottedplant", "img": "images/plant_pot/c.jpg"},
    {"id": "D", "desc": "Oak table", "type": "table", "img": ""}
]"#;

const WORD2VEC: &str = "4 2
A 1.0 0.0
B 0.9 0.1
C 0.0 1.0
D -1.0 0.0
";

#[fixture]
fn engine() -> TextSearchEngine {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(dir.path().join("catalog.json"), CATALOG).unwrap();
    fs::write(dir.path().join("word2vec.txt"), WORD2VEC).unwrap();

    let catalog = Catalog::load(&dir.path().join("catalog.json")).unwrap();
    let word2vec = WordVectors::load(&dir.path().join("word2vec.txt")).unwrap();
    TextSearchEngine::build(catalog, Some(word2vec)).unwrap().with_count(2)
}

#[rstest]
#[case("red chair", "A")]
#[case("the BLUE sofa", "B")]
#[case("plant pot", "C")]
fn closest_item(engine: TextSearchEngine, #[case] query: &str, #[case] expected: &str) {
    match engine.find_closest(query) {
        Closest::Found { id, distance } => {
            assert_eq!(id, expected);
            assert!(distance < 1.0);
        }
        Closest::NotFound => panic!("{query} 没有找到商品"),
    }
}

#[rstest]
fn unknown_words(engine: TextSearchEngine) {
    assert_eq!(engine.find_closest("lamp"), Closest::NotFound);
    assert_eq!(engine.associate("lamp"), Association::Missing);
    // 联想失败时返回目录中的前几件商品
    assert_eq!(
        engine.process_query_w2vec("lamp"),
        vec!["images/chair/a.jpg", "images/sofa/b.jpg"]
    );
}

#[rstest]
fn process_query(engine: TextSearchEngine) {
    let paths = engine.process_query("red chair");
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], "images/chair/a.jpg");
}

#[rstest]
fn word2vec_association(engine: TextSearchEngine) {
    assert_eq!(engine.associate("red chair"), Association::Found(vec!["B".into(), "C".into()]));
    assert_eq!(
        engine.process_query_w2vec("red chair"),
        vec!["images/sofa/b.jpg", "images/plant_pot/c.jpg"]
    );
}

#[rstest]
#[case("A")]
#[case("B")]
#[case("D")]
fn item_vector_finds_itself(engine: TextSearchEngine, #[case] id: &str) {
    let vector = engine.item_vector(id).unwrap();
    let nearest = engine.nearest_items(&vector, 1);
    assert_eq!(nearest[0].0, id);
    assert!(nearest[0].1.abs() < 1e-9);
    assert!(engine.item_vector("Z").is_none());
}

#[rstest]
fn class_as_query(engine: TextSearchEngine) {
    let query = resolve_text_query("", "pottedplant");
    assert!(matches!(engine.find_closest(&query), Closest::Found { id, .. } if id == "C"));
}

#[test]
fn invalid_word2vec_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("word2vec.txt");
    fs::write(&path, "2 3\nA 1.0 0.0 0.0\nB 1.0 0.0\n").unwrap();
    assert!(WordVectors::load(&path).is_err());
}
