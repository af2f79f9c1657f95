//! Tests for the files crate.

#[cfg(test)]
mod integration_tests {
    use crate::codec;
    use crate::hashing::{Blake3Hasher, ContentHasher};
    use crate::index::ListEntry;
    use crate::service::FilesService;
    use crate::shared_file::ContentHash;
    use parking_lot::Mutex;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    /// Blocks every hash until the test releases it.
    struct GatedHasher {
        started: Mutex<mpsc::Sender<PathBuf>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ContentHasher for GatedHasher {
        fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
            let _ = self.started.lock().send(path.to_path_buf());
            let _ = self.release.lock().recv_timeout(Duration::from_secs(10));
            Blake3Hasher::new().hash_file(path)
        }
    }

    fn gated_service() -> (FilesService, mpsc::Receiver<PathBuf>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let hasher = GatedHasher {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        };
        (
            FilesService::with_hasher(Arc::new(hasher)),
            started_rx,
            release_tx,
        )
    }

    async fn wait_idle(service: &FilesService) {
        for _ in 0..500 {
            if service.controller().hashing().is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hashing worker did not go idle");
    }

    #[tokio::test]
    async fn test_full_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::create_dir(&a).unwrap();
        let file = a.join("b.txt");
        let content = vec![42u8; 10_000];
        std::fs::write(&file, &content).unwrap();

        let service = FilesService::in_memory();
        let worker = service.start_hashing();
        let before = service.status().count;

        // Share
        let shared = service.share(file.to_str().unwrap()).unwrap();
        assert_eq!(shared.cached_length, 10_000);
        let status = service.status();
        assert_eq!(status.count, before + 1);
        assert!(status.hashing.is_none() || status.hashing.as_deref() == Some(file.as_path()));

        // Browse the parent directory through its transport form
        let listing = service.list(Some(codec::encode_path(&a).as_str())).unwrap();
        assert_eq!(
            listing.find("b.txt"),
            Some(&ListEntry::File {
                name: "b.txt".into(),
                size: 10_000
            })
        );

        // Hash lands on the record
        wait_idle(&service).await;
        assert_eq!(
            service.get(&file).unwrap().content_hash,
            Some(ContentHash::from_data(&content))
        );

        // Unshare
        assert_eq!(
            service
                .unshare_files(&codec::encode_path_list(&[&file]))
                .unwrap(),
            1
        );
        let listing = service.list(Some(codec::encode_path(&a).as_str())).unwrap();
        assert!(listing.find("b.txt").is_none());
        assert_eq!(service.status().count, before);

        service.stop_hashing();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_browse_from_roots() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("x").join("y");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("z.bin"), b"z").unwrap();

        let service = FilesService::in_memory();
        service
            .share(nested.join("z.bin").to_str().unwrap())
            .unwrap();

        // walk down from the roots one directory entry at a time
        let roots = service.list(None).unwrap();
        assert_eq!(roots.len(), 1);
        let mut current = PathBuf::from(roots.iter().next().unwrap().name());
        loop {
            let listing = service.list(Some(codec::encode_path(&current).as_str())).unwrap();
            let entry = listing.iter().next().unwrap().clone();
            match entry {
                ListEntry::Directory { name } => current.push(name),
                ListEntry::File { name, size } => {
                    assert_eq!(name, "z.bin");
                    assert_eq!(size, 1);
                    assert_eq!(current, nested);
                    break;
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unshare_during_hashing_is_not_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.iso");
        std::fs::write(&file, b"iso").unwrap();

        let (service, started, release) = gated_service();
        let worker = service.start_hashing();
        service.share(file.to_str().unwrap()).unwrap();

        let in_flight = started.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(in_flight, file);
        assert_eq!(service.status().hashing, Some(file.clone()));

        assert!(service.controller().unshare_file(&file));
        assert_eq!(service.status().hashing, None);
        release.send(()).unwrap();

        wait_idle(&service).await;
        assert!(service.get(&file).is_none());
        assert_eq!(service.hashing_status().discarded, 1);
        assert_eq!(service.hashing_status().completed, 0);

        service.stop_hashing();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reshare_during_hashing_gets_fresh_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.pdf");
        std::fs::write(&file, b"v1").unwrap();

        let (service, started, release) = gated_service();
        let worker = service.start_hashing();
        let first = service.share(file.to_str().unwrap()).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        // unshare and share again while the first hash is still running
        service.controller().unshare_file(&file);
        std::fs::write(&file, b"version two").unwrap();
        let second = service.share(file.to_str().unwrap()).unwrap();
        assert!(second.generation > first.generation);
        assert_eq!(second.cached_length, 11);

        release.send(()).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        release.send(()).unwrap();

        wait_idle(&service).await;
        let record = service.get(&file).unwrap();
        assert_eq!(record.generation, second.generation);
        assert_eq!(
            record.content_hash,
            Some(ContentHash::from_data(b"version two"))
        );

        service.stop_hashing();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listing_never_waits_for_hashing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("slow.bin");
        std::fs::write(&file, b"slow").unwrap();

        let (service, started, release) = gated_service();
        let worker = service.start_hashing();
        service.share(file.to_str().unwrap()).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        // hash is parked; reads still answer immediately
        let listing = service
            .list(Some(codec::encode_path(dir.path()).as_str()))
            .unwrap();
        assert!(listing.find("slow.bin").is_some());
        assert_eq!(service.status().count, 1);

        release.send(()).unwrap();
        wait_idle(&service).await;
        assert!(service.get(&file).unwrap().is_hashed());

        service.stop_hashing();
        worker.await.unwrap();
    }
}
