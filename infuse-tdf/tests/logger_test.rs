use infuse_proto::{EpochTime, TdfId};
use infuse_tdf::vfs::{FaultInjectingFileSystem, MemFileSystem};
use infuse_tdf::{
    parse_block, FileBackend, LoggersMask, RamFlashBackend, TdfLoggerSet, BLOCK_HEADER_LEN,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BLOCK_SIZE: usize = 64;
/// 3-byte untimed header + 17-byte payload.
const RECORD_PAYLOAD: usize = 17;
const RECORD_LEN: usize = 20;

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn records_never_span_blocks() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut set = TdfLoggerSet::new();
    let mask = set.register("flash", Box::new(RamFlashBackend::new(BLOCK_SIZE, 16, 1)));
    let logger = set.logger(0).unwrap().clone();

    // Two 20-byte records fit the 56 usable bytes; the third must open a
    // fresh block.
    let per_block = (BLOCK_SIZE - BLOCK_HEADER_LEN) / RECORD_LEN;
    assert_eq!(per_block, 2);

    for i in 0..3u8 {
        set.log(
            mask,
            TdfId::new(0x30),
            EpochTime::ZERO,
            &[i; RECORD_PAYLOAD],
        );
    }

    assert_eq!(logger.current_block(), 1);
    wait_for("first block commit", || logger.committed_blocks() == 1);

    let mut stored = vec![0u8; BLOCK_SIZE];
    logger.with_backend(|b| b.block_read(0, 0, &mut stored)).unwrap();

    let block = parse_block(&stored).unwrap();
    assert_eq!(block.index_low, 0);
    let records = block.records(&|_| Some(RECORD_PAYLOAD)).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload, &[0u8; RECORD_PAYLOAD][..]);
    assert_eq!(records[1].payload, &[1u8; RECORD_PAYLOAD][..]);

    // Terminator immediately after the record bytes.
    let data_len = 2 * RECORD_LEN;
    assert_eq!(
        &stored[BLOCK_HEADER_LEN + data_len..BLOCK_HEADER_LEN + data_len + 2],
        &[0, 0]
    );

    // The third record landed at the front of block 1.
    set.flush(mask).unwrap();
    wait_for("second block commit", || logger.committed_blocks() == 2);
    logger.with_backend(|b| b.block_read(1, 0, &mut stored)).unwrap();
    let block = parse_block(&stored).unwrap();
    let records = block.records(&|_| Some(RECORD_PAYLOAD)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, &[2u8; RECORD_PAYLOAD][..]);
}

#[test]
fn read_back_preserves_submission_order() {
    let mut set = TdfLoggerSet::new();
    let mask = set.register("flash", Box::new(RamFlashBackend::new(BLOCK_SIZE, 32, 1)));
    let logger = set.logger(0).unwrap().clone();

    let total = 20u8;
    for i in 0..total {
        let mut payload = [0u8; RECORD_PAYLOAD];
        payload[0] = i;
        set.log(mask, TdfId::new(0x31), EpochTime::ZERO, &payload);
    }
    set.flush(mask).unwrap();

    let blocks = logger.current_block();
    wait_for("all blocks committed", || {
        logger.committed_blocks() == blocks
    });

    let mut seen = Vec::new();
    let mut stored = vec![0u8; BLOCK_SIZE];
    for index in 0..blocks {
        logger
            .with_backend(|b| b.block_read(index, 0, &mut stored))
            .unwrap();
        let block = parse_block(&stored).unwrap();
        for record in block.records(&|_| Some(RECORD_PAYLOAD)).unwrap() {
            seen.push(record.payload[0]);
        }
    }
    let expected: Vec<u8> = (0..total).collect();
    assert_eq!(seen, expected);
}

#[test]
fn array_records_carry_period() {
    let mut set = TdfLoggerSet::new();
    let mask = set.register("flash", Box::new(RamFlashBackend::new(128, 8, 1)));
    let logger = set.logger(0).unwrap().clone();

    let base = EpochTime::from_seconds(400);
    let samples = [[1u8, 0], [2, 0], [3, 0], [4, 0]].concat();
    set.log_array(mask, TdfId::new(0x40), 2, 4, base, 65_536 / 2, &samples);
    set.flush(mask).unwrap();
    wait_for("array block commit", || logger.committed_blocks() == 1);

    let mut stored = vec![0u8; 128];
    logger.with_backend(|b| b.block_read(0, 0, &mut stored)).unwrap();
    let block = parse_block(&stored).unwrap();
    let records = block.records(&|_| Some(2)).unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.sample_count, 4);
    // base + i * period, period of half a second.
    assert_eq!(record.sample_time(0).unwrap(), base);
    assert_eq!(
        record.sample_time(2).unwrap(),
        EpochTime::from_seconds(401)
    );
}

#[test]
fn backend_failure_does_not_drop_other_sinks() {
    let mut set = TdfLoggerSet::new();

    let failing_fs = Arc::new(FaultInjectingFileSystem::new(Arc::new(MemFileSystem::new())));
    // Room for the directory entry but not a single block.
    failing_fs.set_full_after(16);
    let file_mask = set.register(
        "file",
        Box::new(FileBackend::new(failing_fs, "/logs", BLOCK_SIZE, 4).unwrap()),
    );
    let flash_mask = set.register("flash", Box::new(RamFlashBackend::new(BLOCK_SIZE, 16, 1)));
    let both = file_mask | flash_mask;

    for i in 0..4u8 {
        set.log(
            both,
            TdfId::new(0x50),
            EpochTime::ZERO,
            &[i; RECORD_PAYLOAD],
        );
    }
    // The file flush reports the persist failure; the flash sink is whole.
    let err = set.flush(both).unwrap_err();
    assert!(matches!(err, infuse_tdf::TdfError::PersistFailure(_)));

    let file_logger = set.logger(0).unwrap();
    let flash_logger = set.logger(1).unwrap().clone();
    wait_for("flash commits despite file failure", || {
        flash_logger.committed_blocks() == flash_logger.current_block()
    });

    assert!(file_logger.has_failed());
    assert!(!flash_logger.has_failed());
    assert_eq!(
        flash_logger
            .counters()
            .records_logged
            .load(std::sync::atomic::Ordering::Relaxed),
        4
    );

    let mut stored = vec![0u8; BLOCK_SIZE];
    flash_logger
        .with_backend(|b| b.block_read(0, 0, &mut stored))
        .unwrap();
    let records = parse_block(&stored)
        .unwrap()
        .records(&|_| Some(RECORD_PAYLOAD))
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn file_backend_persists_to_real_filesystem() {
    use infuse_tdf::vfs::StdFileSystem;

    let dir = tempfile::tempdir().unwrap();
    let mut set = TdfLoggerSet::new();
    let mask = set.register(
        "file",
        Box::new(
            FileBackend::new(
                Arc::new(StdFileSystem),
                dir.path().join("logs"),
                BLOCK_SIZE,
                4,
            )
            .unwrap(),
        ),
    );
    let logger = set.logger(0).unwrap().clone();

    set.log(
        mask,
        TdfId::new(0x35),
        EpochTime::from_seconds(777),
        &[7; 9],
    );
    // File backends are sync-required, so flush returning means the block
    // is on disk.
    set.flush(mask).unwrap();
    assert_eq!(logger.committed_blocks(), 1);

    let file = dir.path().join("logs/00000000-00000003.tdf");
    let bytes = std::fs::read(file).unwrap();
    let block = parse_block(&bytes[..BLOCK_SIZE]).unwrap();
    let records = block.records(&|_| Some(9)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, &[7; 9][..]);
    assert_eq!(
        records[0].sample_time(0).unwrap(),
        EpochTime::from_seconds(777)
    );
}

#[test]
fn mask_routing_skips_unselected_loggers() {
    let mut set = TdfLoggerSet::new();
    let a = set.register("a", Box::new(RamFlashBackend::new(BLOCK_SIZE, 8, 1)));
    let _b = set.register("b", Box::new(RamFlashBackend::new(BLOCK_SIZE, 8, 1)));

    set.log(a, TdfId::new(0x60), EpochTime::ZERO, &[9; 4]);
    set.log(
        LoggersMask::NONE,
        TdfId::new(0x60),
        EpochTime::ZERO,
        &[9; 4],
    );

    let logged = |bit: u8| {
        set.logger(bit)
            .unwrap()
            .counters()
            .records_logged
            .load(std::sync::atomic::Ordering::Relaxed)
    };
    assert_eq!(logged(0), 1);
    assert_eq!(logged(1), 0);
}

#[test]
fn oversized_record_is_counted_not_committed() {
    let mut set = TdfLoggerSet::new();
    let mask = set.register("flash", Box::new(RamFlashBackend::new(BLOCK_SIZE, 8, 1)));
    let logger = set.logger(0).unwrap();

    set.log(mask, TdfId::new(0x61), EpochTime::ZERO, &[0; 200]);
    assert_eq!(
        logger
            .counters()
            .records_dropped
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    assert_eq!(logger.current_block(), 0);
}
