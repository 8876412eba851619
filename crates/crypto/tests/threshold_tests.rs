//! Integration tests for threshold signature recovery

use snapsync_crypto::{sha256, Hash, PublicKey, SecretKeyShare, Signature, ThresholdScheme};

/// Build the secret share for 1-based index `i` from the polynomial
/// f(x) = 11 + 2x + 9x²; the group secret is f(0) = 11.
fn share(i: u64) -> SecretKeyShare {
    let value = 11 + 2 * i + 9 * i * i;
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&value.to_be_bytes());
    SecretKeyShare::from_bytes(&bytes).unwrap()
}

fn common_public_key() -> PublicKey {
    share(0).public_key()
}

fn snapshot_hash(label: &str) -> Hash {
    sha256(label.as_bytes())
}

#[test]
fn full_round_recover_and_verify() {
    let n = 4;
    let t = ThresholdScheme::supermajority(n);
    let scheme = ThresholdScheme::new(t, n).unwrap();
    let msg = snapshot_hash("block 1024");

    // every share verifies individually
    for i in 1..=n as u64 {
        let sig = share(i).sign(&msg);
        assert!(scheme.verify(&msg, &sig, &share(i).public_key()));
    }

    // any t of them recover the same aggregate
    let indices = [1u64, 3, 4];
    let shares: Vec<Signature> = indices.iter().map(|i| share(*i).sign(&msg)).collect();
    let coeffs = scheme.lagrange_coeffs(&indices).unwrap();
    let aggregate = scheme.recover_signature(&shares, &coeffs).unwrap();

    assert!(!aggregate.is_identity());
    assert!(scheme.verify(&msg, &aggregate, &common_public_key()));
    assert!(!scheme.verify(&snapshot_hash("block 1025"), &aggregate, &common_public_key()));
}

#[test]
fn aggregate_is_independent_of_contributing_subset() {
    let scheme = ThresholdScheme::new(3, 4).unwrap();
    let msg = snapshot_hash("block 2048");

    let recover = |indices: [u64; 3]| {
        let shares: Vec<Signature> = indices.iter().map(|i| share(*i).sign(&msg)).collect();
        let coeffs = scheme.lagrange_coeffs(&indices).unwrap();
        scheme.recover_signature(&shares, &coeffs).unwrap()
    };

    // Lagrange interpolation reproduces the same group signature for any
    // quorum subset
    assert_eq!(recover([1, 2, 3]), recover([2, 3, 4]));
    assert_eq!(recover([1, 2, 4]), recover([1, 3, 4]));
}

#[test]
fn wire_round_trip_preserves_verification() {
    let scheme = ThresholdScheme::new(3, 4).unwrap();
    let msg = snapshot_hash("block 4096");

    let sig = share(2).sign(&msg);
    let (x, y) = sig.to_coordinates();
    let sig = Signature::from_coordinates(&x, &y).unwrap();

    let pk = share(2).public_key();
    let pk = PublicKey::from_components(&pk.to_components()).unwrap();

    assert!(scheme.verify(&msg, &sig, &pk));
}
