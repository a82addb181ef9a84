use std::fs;

use proptest::prelude::*;
use tempfile::TempDir;

use tomb::service::{ArchivePathRequest, ArchiveService, ServiceOptions};
use tomb::storage::content::{self, Codec};
use tomb::storage::evidence::EvidenceLog;
use tomb::storage::model::ArchiveReason;
use tomb::storage::sqlite::SqliteDal;

fn service(dir: &TempDir, codec: Codec) -> ArchiveService {
    let dal = SqliteDal::open_in_memory().unwrap();
    let svc = ArchiveService::new(dal, EvidenceLog::in_dir(&dir.path().join("evidence")))
        .with_options(ServiceOptions {
            codec,
            level: 3,
            ..ServiceOptions::default()
        });
    svc.ensure_schema().unwrap();
    svc
}

fn arb_codec() -> impl Strategy<Value = Codec> {
    prop_oneof![Just(Codec::Zstd), Just(Codec::Zlib)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn archive_then_restore_returns_identical_bytes(
        bytes in prop::collection::vec(any::<u8>(), 0..4096),
        codec in arb_codec(),
    ) {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, codec);
        let src = dir.path().join("input.bin");
        fs::write(&src, &bytes).unwrap();

        let result = svc
            .archive_path(ArchivePathRequest::new("r", &src, ArchiveReason::Dead, "alice", "c1"))
            .unwrap();
        prop_assert_eq!(&result.sha256, &content::digest(&bytes));
        prop_assert_eq!(result.size_bytes, bytes.len() as i64);

        let out = dir.path().join("output.bin");
        svc.restore_to_path(&result.tombstone_id, &out, "bob").unwrap();
        prop_assert_eq!(fs::read(&out).unwrap(), bytes);
    }

    #[test]
    fn identical_content_shares_one_artifact(
        bytes in prop::collection::vec(any::<u8>(), 1..1024),
        copies in 2usize..5,
    ) {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir, Codec::Zstd);
        let mut tombstones = Vec::new();
        let mut artifacts = Vec::new();
        for i in 0..copies {
            let src = dir.path().join(format!("copy-{i}.bin"));
            fs::write(&src, &bytes).unwrap();
            let result = svc
                .archive_path(ArchivePathRequest::new("r", &src, ArchiveReason::Replaced, "alice", "c1"))
                .unwrap();
            artifacts.push(svc.show_item(&result.tombstone_id).unwrap().item.artifact_id);
            tombstones.push(result.tombstone_id);
        }

        tombstones.sort();
        tombstones.dedup();
        prop_assert_eq!(tombstones.len(), copies);
        artifacts.dedup();
        prop_assert_eq!(artifacts.len(), 1);
        prop_assert_eq!(svc.summary().unwrap().count, copies as i64);
    }
}
