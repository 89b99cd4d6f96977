//! Concurrency properties of the resource tree: lost-update-free insertion,
//! readers alongside writers, and rename propagation under load.

use std::sync::Arc;
use std::thread;

use coaptree::ResourceNode;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_concurrent_distinct_inserts_lose_nothing() {
    init_logging();
    const THREADS: usize = 16;
    const ROUNDS: usize = 20;

    for _ in 0..ROUNDS {
        let parent = ResourceNode::new("parent");
        let mut handles = Vec::with_capacity(THREADS);
        for idx in 0..THREADS {
            let parent = Arc::clone(&parent);
            handles.push(thread::spawn(move || {
                parent.add(ResourceNode::new(format!("child-{idx}"))).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(parent.child_count(), THREADS);
        for idx in 0..THREADS {
            let child = parent.get_child(&format!("child-{idx}")).unwrap();
            assert_eq!(child.path(), "parent/");
            assert!(Arc::ptr_eq(&child.parent().unwrap(), &parent));
        }
    }
}

#[test]
fn test_readers_run_alongside_mutation() {
    init_logging();
    let parent = ResourceNode::new("parent");
    parent.add(ResourceNode::new("stable")).unwrap();

    let writer = {
        let parent = Arc::clone(&parent);
        thread::spawn(move || {
            for idx in 0..200 {
                let name = format!("churn-{idx}");
                parent.add(ResourceNode::new(name.clone())).unwrap();
                parent.remove_child(&name);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let parent = Arc::clone(&parent);
            thread::spawn(move || {
                for _ in 0..500 {
                    // The stable child is always resolvable while siblings churn.
                    assert!(parent.get_child("stable").is_some());
                    let _ = parent.children();
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(parent.get_child("stable").is_some());
}

#[test]
fn test_rename_rekeys_and_propagates_paths() {
    init_logging();
    let root = ResourceNode::new("root");
    let mid = ResourceNode::new("mid");
    let leaf = ResourceNode::new("leaf");
    mid.add(Arc::clone(&leaf)).unwrap();
    root.add(Arc::clone(&mid)).unwrap();

    assert_eq!(leaf.uri(), "root/mid/leaf");

    mid.set_name("renamed").unwrap();

    // Old key gone, new key present, descendant paths rewritten.
    assert!(root.get_child("mid").is_none());
    assert!(Arc::ptr_eq(&root.get_child("renamed").unwrap(), &mid));
    assert_eq!(leaf.uri(), "root/renamed/leaf");
    assert_eq!(leaf.path(), "root/renamed/");
}

#[test]
fn test_concurrent_renames_of_siblings() {
    init_logging();
    const SIBLINGS: usize = 8;

    let parent = ResourceNode::new("parent");
    let children: Vec<_> = (0..SIBLINGS)
        .map(|idx| {
            let child = ResourceNode::new(format!("old-{idx}"));
            parent.add(Arc::clone(&child)).unwrap();
            child
        })
        .collect();

    let handles: Vec<_> = children
        .iter()
        .enumerate()
        .map(|(idx, child)| {
            let child = Arc::clone(child);
            thread::spawn(move || child.set_name(format!("new-{idx}")).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(parent.child_count(), SIBLINGS);
    for idx in 0..SIBLINGS {
        assert!(parent.get_child(&format!("old-{idx}")).is_none());
        let child = parent.get_child(&format!("new-{idx}")).unwrap();
        assert_eq!(child.uri(), format!("parent/new-{idx}"));
    }
}

#[test]
fn test_nested_merge_serializes_with_concurrent_add() {
    init_logging();
    const ROUNDS: usize = 200;

    // A same-name merge descends into "foo" while another thread adds a
    // child with the same name there. Whichever wins the race, the surviving
    // "shared" entry must be the directly added node: the merge either lands
    // first and is replaced, or arrives second and folds into it.
    for round in 0..ROUNDS {
        let parent = ResourceNode::new("coap");
        let nested = ResourceNode::new("foo");
        parent.add(Arc::clone(&nested)).unwrap();

        let duplicate = ResourceNode::new("coap");
        let foo2 = ResourceNode::new("foo");
        let from_merge = ResourceNode::new("shared");
        from_merge.add(ResourceNode::new("inner")).unwrap();
        foo2.add(from_merge).unwrap();
        duplicate.add(foo2).unwrap();

        let fresh = ResourceNode::new("shared");

        let merger = {
            let parent = Arc::clone(&parent);
            thread::spawn(move || parent.add(duplicate).unwrap())
        };
        let adder = {
            let nested = Arc::clone(&nested);
            let fresh = Arc::clone(&fresh);
            thread::spawn(move || nested.add(fresh).unwrap())
        };
        merger.join().unwrap();
        adder.join().unwrap();

        let survivor = nested.get_child("shared").unwrap();
        assert!(
            Arc::ptr_eq(&survivor, &fresh),
            "round {round}: merge output displaced a concurrently added child"
        );
        assert!(Arc::ptr_eq(&survivor.parent().unwrap(), &nested));
        assert_eq!(survivor.path(), "coap/foo/");
    }
}

#[test]
fn test_reparenting_detaches_from_old_parent() {
    init_logging();
    let first = ResourceNode::new("first");
    let second = ResourceNode::new("second");
    let child = ResourceNode::new("child");

    first.add(Arc::clone(&child)).unwrap();
    assert_eq!(child.path(), "first/");

    second.add(Arc::clone(&child)).unwrap();

    // Never a descendant of two parents at once.
    assert_eq!(first.child_count(), 0);
    assert!(Arc::ptr_eq(&child.parent().unwrap(), &second));
    assert_eq!(child.path(), "second/");
}
