use blake2::digest::consts::{U32, U5, U8};
use blake2::{Blake2b, Blake2b512, Digest};
use ed25519_dalek::hazmat::{raw_sign, raw_verify, ExpandedSecretKey};
use ed25519_dalek::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Result, WalletError};

/// A 32-byte Ed25519 public key. Account addresses are an encoding of this.
pub type PublicKey = [u8; 32];
/// A 32-byte block hash (or any other 32-byte root).
pub type BlockHash = [u8; 32];

pub const ZERO_HASH: BlockHash = [0u8; 32];

// Nano's base32 alphabet (no 0, 2, l, v).
const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

/// Ledger flavour. Only changes the address prefix and the base difficulties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Nano,
    Banano,
}

impl Network {
    pub fn prefix(self) -> &'static str {
        match self {
            Network::Nano => "nano_",
            Network::Banano => "ban_",
        }
    }
}

/// Private/public key pair for one account. The private half is wiped on drop.
pub struct KeyPair {
    pub private: Zeroizing<[u8; 32]>,
    pub public: PublicKey,
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut h = Blake2b::<U32>::new();
    h.update(data);
    h.finalize().into()
}

/// Derive the key pair for `index` on `seed`: blake2b-256(seed || index_be).
pub fn keypair_from_seed(seed: &[u8; 32], index: u32) -> KeyPair {
    let mut h = Blake2b::<U32>::new();
    h.update(seed);
    h.update(index.to_be_bytes());
    let private = Zeroizing::new(<[u8; 32]>::from(h.finalize()));
    let public = public_from_private(&private);
    KeyPair { private, public }
}

fn expand(private: &[u8; 32]) -> ExpandedSecretKey {
    let digest = Blake2b512::digest(private);
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&digest);
    let esk = ExpandedSecretKey::from_bytes(&bytes);
    bytes.zeroize();
    esk
}

pub fn public_from_private(private: &[u8; 32]) -> PublicKey {
    VerifyingKey::from(&expand(private)).to_bytes()
}

/// Ed25519 signature using BLAKE2b-512 as the internal hash.
pub fn sign(private: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let esk = expand(private);
    let vk = VerifyingKey::from(&esk);
    raw_sign::<Blake2b512>(&esk, message, &vk).to_bytes()
}

pub fn verify(public: &PublicKey, message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    raw_verify::<Blake2b512>(&vk, message, &Signature::from_bytes(signature)).is_ok()
}

// -----------------------------------------------------------------------------
// Addresses
// -----------------------------------------------------------------------------

/// Encode `data` as `chars` base32 symbols, left-padding with zero bits.
fn encode_base32(data: &[u8], chars: usize) -> String {
    let pad = chars * 5 - data.len() * 8;
    let mut out = String::with_capacity(chars);
    for i in 0..chars {
        let mut v = 0usize;
        for b in 0..5 {
            let pos = i * 5 + b;
            let bit = if pos < pad {
                0
            } else {
                let p = pos - pad;
                (data[p / 8] >> (7 - p % 8)) & 1
            };
            v = (v << 1) | bit as usize;
        }
        out.push(ALPHABET[v] as char);
    }
    out
}

fn decode_base32(text: &str, bytes: usize) -> Option<Vec<u8>> {
    let pad = text.len() * 5 - bytes * 8;
    let mut out = vec![0u8; bytes];
    for (i, c) in text.bytes().enumerate() {
        let v = ALPHABET.iter().position(|&a| a == c)?;
        for b in 0..5 {
            let bit = ((v >> (4 - b)) & 1) as u8;
            let pos = i * 5 + b;
            if pos < pad {
                if bit != 0 {
                    return None;
                }
                continue;
            }
            let p = pos - pad;
            out[p / 8] |= bit << (7 - p % 8);
        }
    }
    Some(out)
}

fn checksum(public: &PublicKey) -> [u8; 5] {
    let mut h = Blake2b::<U5>::new();
    h.update(public);
    let mut sum: [u8; 5] = h.finalize().into();
    sum.reverse();
    sum
}

pub fn address_from_public(public: &PublicKey, network: Network) -> String {
    format!(
        "{}{}{}",
        network.prefix(),
        encode_base32(public, 52),
        encode_base32(&checksum(public), 8)
    )
}

/// Decode any `nano_`, `xrb_` or `ban_` address to its public key, checking the checksum.
pub fn public_from_address(address: &str) -> Result<PublicKey> {
    let body = ["nano_", "xrb_", "ban_"]
        .iter()
        .find_map(|p| address.strip_prefix(p))
        .ok_or_else(|| WalletError::invalid(format!("invalid address prefix: {address}")))?;
    if !body.is_ascii() || body.len() != 60 {
        return Err(WalletError::invalid(format!("invalid address length: {address}")));
    }
    let key = decode_base32(&body[..52], 32)
        .ok_or_else(|| WalletError::invalid(format!("invalid address encoding: {address}")))?;
    let mut public = [0u8; 32];
    public.copy_from_slice(&key);
    if encode_base32(&checksum(&public), 8) != body[52..] {
        return Err(WalletError::invalid(format!("invalid address checksum: {address}")));
    }
    Ok(public)
}

pub fn is_valid_address(address: &str) -> bool {
    public_from_address(address).is_ok()
}

/// Two addresses name the same account regardless of prefix (`xrb_` vs `nano_`).
pub fn same_account(a: &str, b: &str) -> bool {
    match (public_from_address(a), public_from_address(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

// -----------------------------------------------------------------------------
// Hex helpers
// -----------------------------------------------------------------------------

pub fn parse_hash(text: &str) -> Result<BlockHash> {
    let bytes = hex::decode(text).map_err(|_| WalletError::invalid(format!("invalid hash: {text}")))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::invalid(format!("hash must be 32 bytes: {text}")))
}

pub fn parse_seed(text: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(hex::decode(text).map_err(|_| WalletError::invalid("seed is not hex"))?);
    if bytes.len() != 32 {
        return Err(WalletError::invalid("seed must be 32 bytes"));
    }
    let mut seed = Zeroizing::new([0u8; 32]);
    seed.copy_from_slice(&bytes);
    Ok(seed)
}

/// Fresh 32-byte seed from the OS RNG, upper-case hex.
pub fn generate_seed() -> Zeroizing<String> {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let seed = Zeroizing::new(hex::encode_upper(bytes));
    bytes.zeroize();
    seed
}

// -----------------------------------------------------------------------------
// Proof of work
// -----------------------------------------------------------------------------

/// blake2b-64(work_le || root), read little-endian.
pub fn work_value(root: &[u8; 32], work: u64) -> u64 {
    let mut h = Blake2b::<U8>::new();
    h.update(work.to_le_bytes());
    h.update(root);
    u64::from_le_bytes(h.finalize().into())
}

pub fn work_valid(root: &[u8; 32], work: u64, difficulty: u64) -> bool {
    work_value(root, work) >= difficulty
}

pub fn parse_work(text: &str) -> Result<u64> {
    u64::from_str_radix(text, 16).map_err(|_| WalletError::invalid(format!("invalid work: {text}")))
}

pub fn format_work(work: u64) -> String {
    format!("{work:016x}")
}
