// Wallet lifecycle tests: deterministic derivation, account creation under
// concurrency, ad-hoc keys and seed encryption.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::*;
use pippin::{crypto, WalletError};

#[tokio::test]
async fn test_deterministic_accounts_match_reference_vectors() {
    println!("🧪 Testing deterministic account derivation...");
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;

    let wallet = wallets.wallet_create(Some(SEED_A)).expect("Failed to create wallet");
    let created = wallets.accounts_create(&wallet.id, 4).await.expect("Failed to create accounts");
    assert_eq!(
        created,
        vec![
            "nano_3tdqk8ghsdfapzhrag5978izd19minorfmxergefkecdsbyxaw6og4fejs89",
            "nano_1frwge7oebdn87jip7k3sa1uuyf4yxxjh8jg67i69r7smf7tddj1gr6yremf",
            "nano_3nenrawckyo1ob3psyt71zsdtm1yjs7fpqwjy5kpxergwmf96f6mdenouyyk",
            "nano_1w84hd687n5nywb1zfjat7ghe7czgo39tyeqbnbi67icr4fornhqgh3w5q6a",
        ]
    );

    let other = wallets.wallet_create(Some(SEED_B)).expect("Failed to create wallet");
    let created = wallets.accounts_create(&other.id, 5).await.expect("Failed to create accounts");
    assert_eq!(created[0], "nano_3hntkbk1q6pn1n8481shemojcmtpxxpjbojm7h5h5p6jz53bahjuif6d8j4f");
    assert_eq!(created[4], "nano_319uakdyoq48h3zswtwt8ei7fjdq4mue3dizzz3fbgnteqb5zqeycygteerd");

    let listed = wallets.account_list(&other.id, None).unwrap();
    assert_eq!(listed.len(), 6, "index 0 plus five created");
    assert_eq!(listed[0], derive_address(SEED_B, 0));
    println!("✅ Derivation matches reference addresses");
}

#[tokio::test]
async fn test_new_wallet_has_account_zero() {
    let h = harness(Duration::ZERO);
    let wallet = h.engine.wallets.wallet_create(None).unwrap();
    let accounts = h.engine.wallets.account_list(&wallet.id, None).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0], derive_address(&wallet.seed, 0));
    assert!(crypto::is_valid_address(&accounts[0]));
}

#[tokio::test]
async fn test_invalid_seed_rejected() {
    let h = harness(Duration::ZERO);
    let err = h.engine.wallets.wallet_create(Some("not-a-seed")).unwrap_err();
    assert!(matches!(err, WalletError::InvalidInput(_)), "got {err:?}");
    assert!(h.engine.wallets.list_wallets().unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_account_creation_is_gap_free() {
    println!("🧪 Testing concurrent account creation...");
    let h = harness(Duration::ZERO);
    let wallet = h.engine.wallets.wallet_create(Some(SEED_A)).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let wallets = h.engine.wallets.clone();
        let id = wallet.id.clone();
        tasks.push(tokio::spawn(async move { wallets.account_create(&id, None).await }));
    }
    let mut created = HashSet::new();
    for t in tasks {
        created.insert(t.await.unwrap().expect("account_create failed"));
    }
    assert_eq!(created.len(), 10, "every call got its own account");

    let listed = h.engine.wallets.account_list(&wallet.id, None).unwrap();
    let expected: Vec<String> = (0..=10).map(|i| derive_address(SEED_A, i)).collect();
    assert_eq!(listed, expected, "indexes 0..=10 with no gaps or duplicates");
    println!("✅ Ten concurrent creations produced indexes 1 through 10");
}

#[tokio::test]
async fn test_concurrent_bulk_creation_is_gap_free() {
    let h = harness(Duration::ZERO);
    let wallet = h.engine.wallets.wallet_create(Some(SEED_B)).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let wallets = h.engine.wallets.clone();
        let id = wallet.id.clone();
        tasks.push(tokio::spawn(async move { wallets.accounts_create(&id, 5).await }));
    }
    let mut created = HashSet::new();
    for t in tasks {
        let batch = t.await.unwrap().expect("accounts_create failed");
        assert_eq!(batch.len(), 5);
        // Each batch is a consecutive run of indexes.
        let first = (1..=46).find(|&i| derive_address(SEED_B, i) == batch[0]).expect("batch start in range");
        for (offset, addr) in batch.iter().enumerate() {
            assert_eq!(*addr, derive_address(SEED_B, first + offset as u32));
        }
        created.extend(batch);
    }
    assert_eq!(created.len(), 50, "no address handed out twice");

    let listed = h.engine.wallets.account_list(&wallet.id, None).unwrap();
    let expected: Vec<String> = (0..=50).map(|i| derive_address(SEED_B, i)).collect();
    assert_eq!(listed, expected, "indexes 0..=50 with no gaps or duplicates");
}

#[tokio::test]
async fn test_bulk_creation_rejects_address_held_by_adhoc_key() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();

    // Import the key that index 1 would derive.
    let seed = crypto::parse_seed(SEED_A).unwrap();
    let key = hex::encode_upper(*crypto::keypair_from_seed(&seed, 1).private);
    let adhoc = wallets.adhoc_account_create(&wallet.id, &key, None).await.unwrap();
    assert_eq!(adhoc, derive_address(SEED_A, 1));

    let err = wallets.accounts_create(&wallet.id, 2).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountAlreadyExists(ref a) if *a == adhoc), "got {err:?}");

    let listed = wallets.account_list(&wallet.id, None).unwrap();
    assert_eq!(listed, vec![derive_address(SEED_A, 0), adhoc.clone()]);
    let record = wallets.wallet(&wallet.id).unwrap();
    assert!(wallets.account_key(&record, &adhoc).unwrap().adhoc);
}

#[tokio::test]
async fn test_explicit_index_and_duplicates() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();

    let addr = wallets.account_create(&wallet.id, Some(7)).await.unwrap();
    assert_eq!(addr, derive_address(SEED_A, 7));
    let err = wallets.account_create(&wallet.id, Some(7)).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountAlreadyExists(_)));

    // Next free index follows the highest one.
    let next = wallets.account_create(&wallet.id, None).await.unwrap();
    assert_eq!(next, derive_address(SEED_A, 8));
}

#[tokio::test]
async fn test_adhoc_accounts() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(None).unwrap();

    // Account 0 of the all-zero seed.
    let key = "9F0E444C69F77A49BD0BE89DB92C38FE713E0963165CCA12FAF5712D7657120F";
    let addr = wallets.adhoc_account_create(&wallet.id, &key.to_lowercase(), None).await.unwrap();
    assert_eq!(addr, "nano_3i1aq1cchnmbn9x5rsbap8b15akfh7wj7pwskuzi7ahz8oq6cobd99d4r3b7");
    assert!(wallets.wallet_contains(&wallet.id, &addr).unwrap());

    let err = wallets.adhoc_account_create(&wallet.id, key, None).await.unwrap_err();
    assert!(matches!(err, WalletError::AccountAlreadyExists(_)));

    let record = wallets.wallet(&wallet.id).unwrap();
    let k = wallets.account_key(&record, &addr).unwrap();
    assert!(k.adhoc);
    assert_eq!(hex::encode_upper(*k.private), key);

    // Ad-hoc accounts list after deterministic ones.
    let listed = wallets.account_list(&wallet.id, None).unwrap();
    assert_eq!(listed.last(), Some(&addr));
}

#[tokio::test]
async fn test_encrypt_unlock_lock_cycle() {
    println!("🧪 Testing seed encryption...");
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();
    let adhoc_key = "1111111111111111111111111111111111111111111111111111111111111111";
    let adhoc = wallets.adhoc_account_create(&wallet.id, adhoc_key, None).await.unwrap();

    wallets.encrypt(&wallet.id, "hunter2").expect("Failed to encrypt");
    let stored = wallets.wallet(&wallet.id).unwrap();
    assert!(stored.encrypted);
    assert_ne!(stored.seed, SEED_A, "seed must not be stored in clear");
    assert!(wallets.is_locked(&wallet.id).unwrap(), "wallet starts locked after encrypt");

    let err = wallets.account_create(&wallet.id, None).await.unwrap_err();
    assert!(matches!(err, WalletError::WalletLocked(_)), "got {err:?}");

    let err = wallets.unlock(&wallet.id, "wrong").unwrap_err();
    assert!(matches!(err, WalletError::DecryptionError));
    assert!(wallets.is_locked(&wallet.id).unwrap());

    wallets.unlock(&wallet.id, "hunter2").expect("Failed to unlock");
    assert!(!wallets.is_locked(&wallet.id).unwrap());
    assert_eq!(wallets.seed_hex(&stored).unwrap().as_str(), SEED_A);
    let k = wallets.account_key(&stored, &adhoc).unwrap();
    assert_eq!(hex::encode_upper(*k.private), adhoc_key);
    let addr = wallets.account_create(&wallet.id, None).await.unwrap();
    assert_eq!(addr, derive_address(SEED_A, 1));

    wallets.lock(&wallet.id).unwrap();
    assert!(wallets.is_locked(&wallet.id).unwrap());
    assert!(matches!(wallets.seed_hex(&stored), Err(WalletError::WalletLocked(_))));
    println!("✅ Encrypt, unlock and lock behave");
}

#[tokio::test]
async fn test_password_change_and_decrypt() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();

    wallets.encrypt(&wallet.id, "first").unwrap();
    wallets.unlock(&wallet.id, "first").unwrap();
    wallets.encrypt(&wallet.id, "second").expect("password change");
    wallets.lock(&wallet.id).unwrap();
    assert!(matches!(wallets.unlock(&wallet.id, "first"), Err(WalletError::DecryptionError)));
    wallets.unlock(&wallet.id, "second").unwrap();

    // Empty password on an unlocked encrypted wallet stores it in clear.
    wallets.encrypt(&wallet.id, "").unwrap();
    let stored = wallets.wallet(&wallet.id).unwrap();
    assert!(!stored.encrypted);
    assert_eq!(stored.seed, SEED_A);
    assert!(!wallets.is_locked(&wallet.id).unwrap());
}

#[tokio::test]
async fn test_change_seed_rederives_accounts() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();
    wallets.accounts_create(&wallet.id, 2).await.unwrap();

    let rederived = wallets.wallet_change_seed(&wallet.id, SEED_B, None).await.unwrap();
    let expected: Vec<String> = (0..3).map(|i| derive_address(SEED_B, i)).collect();
    assert_eq!(rederived, expected);
    assert_eq!(wallets.account_list(&wallet.id, None).unwrap(), expected);
    assert!(!wallets.wallet_contains(&wallet.id, &derive_address(SEED_A, 1)).unwrap());
}

#[tokio::test]
async fn test_wallet_destroy_cascades() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();
    wallets.accounts_create(&wallet.id, 3).await.unwrap();

    wallets.wallet_destroy(&wallet.id).unwrap();
    assert!(matches!(wallets.wallet(&wallet.id), Err(WalletError::WalletNotFound)));
    assert!(h.engine.store.accounts(&wallet.id).unwrap().is_empty());
    assert_eq!(h.engine.store.account_ref(&wallet.id, &derive_address(SEED_A, 1)).unwrap(), None);

    // Same seed in a new wallet starts over at index 0.
    let again = wallets.wallet_create(Some(SEED_A)).unwrap();
    assert_eq!(wallets.account_list(&again.id, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_wallet_balances_and_info() {
    let h = harness(Duration::ZERO);
    let wallets = &h.engine.wallets;
    let wallet = wallets.wallet_create(Some(SEED_A)).unwrap();
    let first = derive_address(SEED_A, 0);
    h.ledger.fund(&first, 3 * ONE_NANO);

    let balances = wallets.wallet_balances(&wallet.id).await.unwrap();
    assert_eq!(balances[&first].pending, 3 * ONE_NANO);
    assert_eq!(balances[&first].balance, 0);

    let pending = wallets.wallet_pending(&wallet.id, 0).await.unwrap();
    assert_eq!(pending[&first].len(), 1);

    let info = wallets.wallet_info(&wallet.id).await.unwrap();
    assert_eq!(info.pending, 3 * ONE_NANO);
    assert_eq!(info.accounts_count, 1);
    assert_eq!(info.adhoc_count, 0);
    assert_eq!(info.deterministic_index, Some(0));
}
