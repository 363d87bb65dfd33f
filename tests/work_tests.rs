// Work race tests: peer wins and cancels, fallback to local generation,
// invalid answers and the pooled source.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::*;
use pippin::{
    crypto,
    difficulty::DifficultyModel,
    engine::{Engine, Parts},
    lock::LocalLockManager,
    metrics,
    miner::Miner,
    storage::Store,
    work::{PooledWork, WorkEngine, WorkPeer},
    WalletError,
};
use tempfile::TempDir;

const ROOT: &str = "718CC2121C3E641059BC1C2CFC45666C99E8AE922F7A807B7D07B62C995D79E2";

fn root() -> [u8; 32] {
    crypto::parse_hash(ROOT).unwrap()
}

fn assert_valid(work: &str, difficulty: u64) {
    let w = crypto::parse_work(work).expect("work is hex");
    assert!(crypto::work_valid(&root(), w, difficulty), "work {work} below {difficulty:016x}");
    assert_eq!(work.len(), 16);
}

#[tokio::test]
async fn test_fast_peer_wins_and_others_are_cancelled() {
    println!("🧪 Testing work race between peers...");
    let fast = FakePeer::new("http://fast", PeerBehaviour::Solve(Duration::ZERO));
    let slow = FakePeer::new("http://slow", PeerBehaviour::Hang);
    let engine = work_engine(vec![fast.clone() as Arc<dyn WorkPeer>, slow.clone()], None, 1);

    let work = engine.generate(root(), TEST_DIFFICULTY).await.expect("race failed");
    assert_valid(&work, TEST_DIFFICULTY);

    // Cancels are fire-and-forget tasks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(slow.cancel_count(), 1, "losing peer is told to stop");
    assert_eq!(slow.cancels.lock().unwrap()[0], ROOT);
    assert_eq!(fast.cancel_count(), 0, "winner is not cancelled");
    assert!(!engine.failure_flag_set());
    println!("✅ Fast peer won, slow peer cancelled");
}

#[tokio::test]
async fn test_all_peers_failing_falls_back_to_local() {
    let a = FakePeer::new("http://a", PeerBehaviour::Fail);
    let b = FakePeer::new("http://b", PeerBehaviour::Fail);
    let engine = work_engine(vec![a.clone() as Arc<dyn WorkPeer>, b.clone()], None, 1);

    let work = engine.generate(root(), TEST_DIFFICULTY).await.expect("local fallback");
    assert_valid(&work, TEST_DIFFICULTY);
    assert!(engine.failure_flag_set(), "failed race is remembered");
    assert_eq!(a.requests.load(Ordering::SeqCst), 1);

    let work = engine.generate(root(), TEST_DIFFICULTY).await.unwrap();
    assert_valid(&work, TEST_DIFFICULTY);
}

#[tokio::test]
async fn test_failure_flag_races_local_alongside_peers() {
    println!("🧪 Testing local work joining the race after a failure...");
    let peer = FakePeer::new("http://flaky", PeerBehaviour::FailThenHang);
    let engine = WorkEngine::new(
        vec![peer.clone() as Arc<dyn WorkPeer>],
        None,
        Miner::new(1),
        DifficultyModel::uniform(TEST_DIFFICULTY),
        Duration::from_secs(300),
        Duration::from_secs(60),
    );

    engine.generate(root(), TEST_DIFFICULTY).await.expect("local fallback");
    assert!(engine.failure_flag_set());

    // The peer now hangs; only a racing local miner can answer before the wave ends.
    let local_before = metrics::WORK_RESULTS.with_label_values(&["local"]).get();
    let started = Instant::now();
    let work = engine.generate(root(), TEST_DIFFICULTY).await.expect("local racer");
    assert_valid(&work, TEST_DIFFICULTY);
    assert!(started.elapsed() < Duration::from_secs(10), "took {:?}", started.elapsed());
    assert!(metrics::WORK_RESULTS.with_label_values(&["local"]).get() > local_before);
    assert_eq!(peer.requests.load(Ordering::SeqCst), 2);

    // The hung peer lost the race and is told to stop.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(peer.cancel_count() >= 1);
    println!("✅ Local miner won while the peer hung");
}

#[tokio::test]
async fn test_invalid_peer_work_is_ignored() {
    let bad = FakePeer::new("http://bad", PeerBehaviour::Invalid);
    let engine = work_engine(vec![bad as Arc<dyn WorkPeer>], None, 1);
    let work = engine.generate(root(), TEST_DIFFICULTY).await.unwrap();
    assert_valid(&work, TEST_DIFFICULTY);
    assert!(engine.failure_flag_set());
}

#[tokio::test]
async fn test_disabled_local_work_surfaces_when_peers_fail() {
    let peer = FakePeer::new("http://down", PeerBehaviour::Fail);
    let engine = work_engine(vec![peer as Arc<dyn WorkPeer>], None, 0);
    let err = engine.generate(root(), TEST_DIFFICULTY).await.unwrap_err();
    assert!(matches!(err, WalletError::WorkDisabled), "got {err:?}");
}

#[tokio::test]
async fn test_silent_peer_times_out() {
    let hung = FakePeer::new("http://hung", PeerBehaviour::Hang);
    let engine = WorkEngine::new(
        vec![hung.clone() as Arc<dyn WorkPeer>],
        None,
        Miner::new(1),
        DifficultyModel::uniform(TEST_DIFFICULTY),
        Duration::from_secs(300),
        Duration::from_millis(200),
    );
    let work = engine.generate(root(), TEST_DIFFICULTY).await.expect("local after timeout");
    assert_valid(&work, TEST_DIFFICULTY);
    assert!(engine.failure_flag_set());
}

#[tokio::test]
async fn test_pooled_source_gets_multiplier() {
    let pool = Arc::new(FakePool { base: TEST_DIFFICULTY, multipliers: Mutex::new(Vec::new()) });
    let engine = work_engine(Vec::new(), Some(pool.clone() as Arc<dyn PooledWork>), 0);
    let work = engine.work_for(root(), true, None).await.unwrap();
    assert_valid(&work, TEST_DIFFICULTY);
    let m = pool.multipliers.lock().unwrap().clone();
    assert_eq!(m.len(), 1);
    assert!(m[0] >= 1.0);
}

#[tokio::test]
async fn test_engine_work_generate_validates_difficulty() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
    let parts = Parts {
        store,
        rpc: Arc::new(FakeLedger::new(Duration::ZERO)),
        work: Arc::new(work_engine(Vec::new(), None, 1)),
        locks: Arc::new(LocalLockManager::new()),
    };
    let engine = Engine::assemble(&test_config(), parts);

    let work = engine.work_generate(ROOT, None).await.unwrap();
    assert_valid(&work, TEST_DIFFICULTY);
    let work = engine.work_generate(ROOT, Some("ff00000000000000")).await.unwrap();
    assert_valid(&work, TEST_DIFFICULTY);

    let err = engine.work_generate(ROOT, Some("not-hex")).await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidInput(_)));
    let err = engine.work_generate("abc", None).await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidInput(_)));
}
