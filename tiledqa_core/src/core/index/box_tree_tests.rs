use itertools::Itertools;

use super::*;

fn cell(i: usize, j: usize) -> Envelope {
    let x = i as f64 * 10.0;
    let y = j as f64 * 10.0;
    Envelope::new(x, y, x + 5.0, y + 5.0)
}

fn grid_tree(n: usize) -> BoxTree<usize> {
    let mut tree = BoxTree::with_extent(Envelope::new(0.0, 0.0, n as f64 * 10.0, n as f64 * 10.0));
    for i in 0..n {
        for j in 0..n {
            tree.insert(cell(i, j), i * n + j);
        }
    }
    tree
}

#[test]
fn search_matches_linear_scan() {
    let tree = grid_tree(30);
    assert_eq!(tree.len(), 900);

    let query = Envelope::new(42.0, 17.0, 133.0, 61.0);

    let found = tree
        .search(&query)
        .map(|entry| entry.value)
        .sorted()
        .collect_vec();

    let expected = (0..30)
        .cartesian_product(0..30)
        .filter(|(i, j)| cell(*i, *j).intersects(&query))
        .map(|(i, j)| i * 30 + j)
        .sorted()
        .collect_vec();

    assert!(!expected.is_empty());
    assert_eq!(found, expected);
}

#[test]
fn straddling_entries_are_found() {
    let mut tree = BoxTree::with_extent(Envelope::new(0.0, 0.0, 100.0, 100.0)).with_max_elements(2);

    tree.insert(Envelope::new(10.0, 10.0, 20.0, 20.0), "a");
    tree.insert(Envelope::new(70.0, 10.0, 80.0, 20.0), "b");
    tree.insert(Envelope::new(45.0, 10.0, 55.0, 20.0), "straddles");
    tree.insert(Envelope::new(60.0, 60.0, 65.0, 65.0), "c");

    let found = tree
        .search(&Envelope::new(49.0, 0.0, 51.0, 100.0))
        .map(|entry| entry.value)
        .collect_vec();

    assert_eq!(found, vec!["straddles"]);
}

#[test]
fn root_grows_for_entries_outside() {
    let mut tree = BoxTree::with_extent(Envelope::new(0.0, 0.0, 10.0, 10.0));
    tree.insert(Envelope::new(1.0, 1.0, 2.0, 2.0), 1);
    tree.insert(Envelope::new(-50.0, 5.0, -40.0, 6.0), 2);
    tree.insert(Envelope::new(200.0, 300.0, 210.0, 310.0), 3);

    let extent = tree.extent().unwrap();
    assert!(extent.contains(&Envelope::new(-50.0, 1.0, 210.0, 310.0)));

    let found = tree
        .search(&Envelope::new(-100.0, -100.0, 1000.0, 1000.0))
        .map(|entry| entry.value)
        .sorted()
        .collect_vec();
    assert_eq!(found, vec![1, 2, 3]);

    let left = tree
        .search(&Envelope::new(-45.0, 0.0, -44.0, 10.0))
        .map(|entry| entry.value)
        .collect_vec();
    assert_eq!(left, vec![2]);
}

#[test]
fn empty_tree_starts_at_first_entry() {
    let mut tree = BoxTree::new();
    assert!(tree.is_empty());
    assert!(tree.search(&Envelope::new(0.0, 0.0, 1.0, 1.0)).next().is_none());

    tree.insert(Envelope::from_point(5.0, 5.0), 'p');
    tree.insert(Envelope::from_point(5.0, 5.0), 'q');
    tree.insert(Envelope::from_point(7.0, 9.0), 'r');

    assert_eq!(tree.len(), 3);
    assert_eq!(tree.search(&Envelope::from_point(5.0, 5.0)).count(), 2);
}

#[test]
fn coincident_points_do_not_split_forever() {
    let mut tree = BoxTree::new().with_max_elements(4);
    for i in 0..100 {
        tree.insert(Envelope::from_point(1.0, 1.0), i);
    }
    assert_eq!(tree.search(&Envelope::from_point(1.0, 1.0)).count(), 100);
}

#[test]
fn retain_and_clear() {
    let mut tree = grid_tree(10);
    tree.retain(|entry| entry.value % 2 == 0);

    assert_eq!(tree.len(), 50);
    assert!(tree.iter().all(|entry| entry.value % 2 == 0));

    tree.clear();
    assert!(tree.is_empty());
    assert!(tree.extent().is_none());
}
