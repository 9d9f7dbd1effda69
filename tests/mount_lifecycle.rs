mod common;

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use evidence_intake::locate::{ExtensionFilter, locate};
use evidence_intake::mount::{ImageMountManager, ImageState, MountSettings, with_mounted_image};

use common::{FakeNode, TreeMountOps, write_tree};

fn mount_settings(root: &std::path::Path) -> MountSettings {
    MountSettings {
        mount_root: root.join("mnt").join("run"),
        options: vec!["ro".into(), "nodev".into(), "rw".into()],
        fs_options: BTreeMap::new(),
    }
}

#[test]
fn scoped_mount_exposes_valid_partitions_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("disk.img");
    std::fs::write(&image, vec![0u8; 2048]).expect("image");
    let tree = dir.path().join("tree");
    write_tree(
        &tree,
        &[
            ("docs/a.txt", b"alpha"),
            ("sys/kernel.txt", b"kernel"),
            ("usr/share/doc.txt", b"doc"),
        ],
    );

    let (ops, log) = TreeMountOps::new(vec![FakeNode::unformatted("loop9p1"), FakeNode::ext4("loop9p2", &tree)]);
    let mut manager = ImageMountManager::new(&image, Box::new(ops), mount_settings(dir.path()));

    let located = with_mounted_image(&mut manager, |mounts, partitions| {
        assert_eq!(partitions.len(), 2);
        assert_eq!(mounts.len(), 1);
        assert!(mounts[0].read_only);
        assert_eq!(mounts[0].partition_name(), "loop9p2");
        assert_eq!(mounts[0].partition_index, 2);

        let filter = ExtensionFilter::new(&[".txt"]);
        let strict: Vec<_> = locate(&mounts[0].path, "loop9p2", &filter, true).iter().collect();
        let all: Vec<_> = locate(&mounts[0].path, "loop9p2", &filter, false).iter().collect();
        (strict, all)
    })
    .expect("mounted run");

    let (strict, all) = located;
    assert_eq!(strict.len(), 1);
    assert!(strict[0].path.ends_with("docs/a.txt"));
    assert_eq!(all.len(), 3);

    assert_eq!(manager.state(), ImageState::TornDown);
    assert!(manager.mounts().is_empty());
    assert!(!dir.path().join("mnt").exists());
    let log = log.lock().expect("lock");
    assert_eq!(log.mount_options, vec![vec!["ro".to_string(), "nodev".to_string()]]);
    assert_eq!(log.calls.last().map(String::as_str), Some("detach"));
}

#[test]
fn panicking_analysis_still_tears_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image = dir.path().join("disk.img");
    std::fs::write(&image, vec![0u8; 2048]).expect("image");
    let tree = dir.path().join("tree");
    write_tree(&tree, &[("a.txt", b"alpha")]);

    let (ops, log) = TreeMountOps::new(vec![FakeNode::ext4("loop9p1", &tree)]);
    let mut manager = ImageMountManager::new(&image, Box::new(ops), mount_settings(dir.path()));

    let result = catch_unwind(AssertUnwindSafe(|| {
        with_mounted_image(&mut manager, |_mounts, _partitions| -> () { panic!("analysis blew up") })
    }));
    assert!(result.is_err());

    assert_eq!(manager.state(), ImageState::TornDown);
    assert!(log.lock().expect("lock").mounted.is_empty());
    assert!(!dir.path().join("mnt").join("run").exists());

    // A second cleanup is a no-op.
    manager.cleanup();
    let detaches = log.lock().expect("lock").calls.iter().filter(|c| *c == "detach").count();
    assert_eq!(detaches, 1);
}
