//! Threshold BLS signatures on BLS12-381
//!
//! Signature shares live in G1 and travel as affine `(x, y)` coordinate
//! pairs; public key shares and the common public key live in G2 and
//! travel as four field-element components. Aggregate signatures are
//! recovered from any `t` shares with Lagrange interpolation at zero and
//! verified with one pairing equation against the common public key.

use blstrs::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::prime::PrimeCurveAffine;
use group::{Curve, Group};

use crate::{CryptoError, Hash, Result};

/// Domain separation tag for hashing snapshot hashes into G1.
const DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_SNAPSYNC_SNAPSHOT_";

/// Size in bytes of one big-endian base-field element
const FP_LEN: usize = 48;

fn decode_field_element(s: &str) -> Result<[u8; FP_LEN]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped)?;
    if bytes.len() != FP_LEN {
        return Err(CryptoError::InvalidLength {
            expected: FP_LEN,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; FP_LEN];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn encode_field_element(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Map a 32-byte message hash onto the signature group.
fn hash_to_point(message: &Hash) -> G1Projective {
    G1Projective::hash_to_curve(message, DST, &[])
}

/// A signature in G1: either one node's signature share or the aggregate
/// signature recovered from a quorum of shares.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(G1Projective);

impl Signature {
    /// Decode a signature from its affine coordinates, as carried on the
    /// wire. Rejects values that are not canonical points of the
    /// signature subgroup, and the identity.
    pub fn from_coordinates(x: &str, y: &str) -> Result<Self> {
        let mut encoded = [0u8; 2 * FP_LEN];
        encoded[..FP_LEN].copy_from_slice(&decode_field_element(x)?);
        encoded[FP_LEN..].copy_from_slice(&decode_field_element(y)?);

        let point = Option::<G1Affine>::from(G1Affine::from_uncompressed(&encoded))
            .ok_or_else(|| CryptoError::InvalidPoint("not a canonical G1 point".into()))?;
        if bool::from(point.is_identity()) {
            return Err(CryptoError::InvalidPoint("identity signature".into()));
        }
        Ok(Self(point.into()))
    }

    /// Affine `(x, y)` coordinates of this signature, hex-encoded.
    pub fn to_coordinates(&self) -> (String, String) {
        let encoded = self.0.to_affine().to_uncompressed();
        (
            encode_field_element(&encoded[..FP_LEN]),
            encode_field_element(&encoded[FP_LEN..]),
        )
    }

    /// Whether this is the degenerate identity signature.
    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signature")
            .field(&hex::encode(self.0.to_affine().to_compressed()))
            .finish()
    }
}

/// A public key in G2: either one node's key share or the network's
/// common threshold public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(G2Projective);

impl PublicKey {
    /// Decode a public key from its four field-element components
    /// `[x.c0, x.c1, y.c0, y.c1]`, as carried on the wire and in
    /// configuration. Rejects non-canonical points and the identity.
    pub fn from_components(components: &[String; 4]) -> Result<Self> {
        let x_c0 = decode_field_element(&components[0])?;
        let x_c1 = decode_field_element(&components[1])?;
        let y_c0 = decode_field_element(&components[2])?;
        let y_c1 = decode_field_element(&components[3])?;

        // Uncompressed G2 serialization orders each coordinate c1 first.
        let mut encoded = [0u8; 4 * FP_LEN];
        encoded[..FP_LEN].copy_from_slice(&x_c1);
        encoded[FP_LEN..2 * FP_LEN].copy_from_slice(&x_c0);
        encoded[2 * FP_LEN..3 * FP_LEN].copy_from_slice(&y_c1);
        encoded[3 * FP_LEN..].copy_from_slice(&y_c0);

        let point = Option::<G2Affine>::from(G2Affine::from_uncompressed(&encoded))
            .ok_or_else(|| CryptoError::InvalidPoint("not a canonical G2 point".into()))?;
        if bool::from(point.is_identity()) {
            return Err(CryptoError::InvalidPoint("identity public key".into()));
        }
        Ok(Self(point.into()))
    }

    /// The four field-element components `[x.c0, x.c1, y.c0, y.c1]`.
    pub fn to_components(&self) -> [String; 4] {
        let encoded = self.0.to_affine().to_uncompressed();
        [
            encode_field_element(&encoded[FP_LEN..2 * FP_LEN]),
            encode_field_element(&encoded[..FP_LEN]),
            encode_field_element(&encoded[3 * FP_LEN..]),
            encode_field_element(&encoded[2 * FP_LEN..3 * FP_LEN]),
        ]
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&hex::encode(self.0.to_affine().to_compressed()))
            .finish()
    }
}

/// One node's secret key share.
///
/// Only the signing side of the scheme needs this type; the hash agent
/// works purely with shares and public keys received from peers.
#[derive(Clone)]
pub struct SecretKeyShare(Scalar);

impl SecretKeyShare {
    /// Decode a secret share from a 32-byte big-endian scalar. Rejects
    /// non-canonical scalars and zero.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let scalar = Option::<Scalar>::from(Scalar::from_bytes_be(bytes))
            .ok_or_else(|| CryptoError::InvalidScalar("not a canonical scalar".into()))?;
        if bool::from(scalar.is_zero()) {
            return Err(CryptoError::InvalidScalar("zero secret share".into()));
        }
        Ok(Self(scalar))
    }

    /// Sign a 32-byte message hash with this share.
    pub fn sign(&self, message: &Hash) -> Signature {
        Signature(hash_to_point(message) * self.0)
    }

    /// The public key share corresponding to this secret share.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(G2Projective::generator() * self.0)
    }
}

impl std::fmt::Debug for SecretKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyShare").finish_non_exhaustive()
    }
}

/// Interpolation weights for one specific set of contributing share
/// indices. Opaque: produced by [`ThresholdScheme::lagrange_coeffs`] and
/// consumed by [`ThresholdScheme::recover_signature`].
#[derive(Debug, Clone)]
pub struct LagrangeCoeffs(Vec<Scalar>);

impl LagrangeCoeffs {
    /// Number of coefficients
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the coefficient set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A `(t, n)` threshold signature scheme instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdScheme {
    t: usize,
    n: usize,
}

impl ThresholdScheme {
    /// Create a scheme with threshold `t` out of `n` participants.
    pub fn new(t: usize, n: usize) -> Result<Self> {
        if t == 0 || n == 0 || t > n {
            return Err(CryptoError::InvalidScheme { t, n });
        }
        Ok(Self { t, n })
    }

    /// The supermajority threshold `ceil(2n/3)` used for snapshot hash
    /// agreement over `n` nodes.
    pub fn supermajority(n: usize) -> usize {
        (2 * n).div_ceil(3)
    }

    /// Threshold `t`
    pub fn threshold(&self) -> usize {
        self.t
    }

    /// Participant count `n`
    pub fn participants(&self) -> usize {
        self.n
    }

    /// Verify a signature over a 32-byte message hash against a public
    /// key. Used both for individual shares (against the share's public
    /// key) and for recovered aggregates (against the common key).
    pub fn verify(&self, message: &Hash, signature: &Signature, public_key: &PublicKey) -> bool {
        let hashed = hash_to_point(message).to_affine();
        pairing(&signature.0.to_affine(), &G2Affine::generator())
            == pairing(&hashed, &public_key.0.to_affine())
    }

    /// Interpolation weights at zero for the given 1-based participant
    /// indices. At least `t` distinct non-zero indices are required;
    /// shares beyond the threshold still interpolate to the same group
    /// signature.
    pub fn lagrange_coeffs(&self, indices: &[u64]) -> Result<LagrangeCoeffs> {
        if indices.len() < self.t {
            return Err(CryptoError::CountMismatch {
                expected: self.t,
                actual: indices.len(),
            });
        }
        for (i, idx) in indices.iter().enumerate() {
            if *idx == 0 {
                return Err(CryptoError::ZeroIndex);
            }
            if indices[..i].contains(idx) {
                return Err(CryptoError::DuplicateIndex(*idx));
            }
        }

        let points: Vec<Scalar> = indices.iter().map(|i| Scalar::from(*i)).collect();
        let mut coeffs = Vec::with_capacity(points.len());
        for (j, x_j) in points.iter().enumerate() {
            let mut numerator = Scalar::ONE;
            let mut denominator = Scalar::ONE;
            for (m, x_m) in points.iter().enumerate() {
                if m == j {
                    continue;
                }
                numerator *= x_m;
                denominator *= x_m - x_j;
            }
            let inverse = Option::<Scalar>::from(denominator.invert())
                .ok_or_else(|| CryptoError::InvalidScalar("singular denominator".into()))?;
            coeffs.push(numerator * inverse);
        }
        Ok(LagrangeCoeffs(coeffs))
    }

    /// Recover the aggregate signature from `t` shares and the matching
    /// interpolation weights.
    pub fn recover_signature(
        &self,
        shares: &[Signature],
        coeffs: &LagrangeCoeffs,
    ) -> Result<Signature> {
        if shares.len() != coeffs.0.len() {
            return Err(CryptoError::CountMismatch {
                expected: coeffs.0.len(),
                actual: shares.len(),
            });
        }
        let mut aggregate = G1Projective::identity();
        for (share, coeff) in shares.iter().zip(coeffs.0.iter()) {
            aggregate += share.0 * coeff;
        }
        Ok(Signature(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shares of the degree-2 polynomial f(x) = 7 + 3x + 5x²; the group
    /// secret is f(0) = 7.
    fn share(i: u64) -> SecretKeyShare {
        let value = 7 + 3 * i + 5 * i * i;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        SecretKeyShare::from_bytes(&bytes).unwrap()
    }

    fn common_public_key() -> PublicKey {
        share(0).public_key()
    }

    fn message() -> Hash {
        crate::sha256(b"snapshot hash agreement")
    }

    #[test]
    fn share_signature_verifies_against_share_key() {
        let scheme = ThresholdScheme::new(3, 4).unwrap();
        let msg = message();
        let sk = share(2);
        let sig = sk.sign(&msg);
        assert!(scheme.verify(&msg, &sig, &sk.public_key()));
        assert!(!scheme.verify(&msg, &sig, &share(3).public_key()));
    }

    #[test]
    fn recovery_from_any_t_subset() {
        let scheme = ThresholdScheme::new(3, 4).unwrap();
        let msg = message();
        let common = common_public_key();

        for indices in [[1u64, 2, 3], [1, 2, 4], [2, 3, 4], [1, 3, 4]] {
            let shares: Vec<Signature> = indices.iter().map(|i| share(*i).sign(&msg)).collect();
            let coeffs = scheme.lagrange_coeffs(&indices).unwrap();
            let aggregate = scheme.recover_signature(&shares, &coeffs).unwrap();
            assert!(scheme.verify(&msg, &aggregate, &common));
        }
    }

    #[test]
    fn recovery_from_more_than_t_shares() {
        let scheme = ThresholdScheme::new(3, 4).unwrap();
        let msg = message();

        let indices = [1u64, 2, 3, 4];
        let shares: Vec<Signature> = indices.iter().map(|i| share(*i).sign(&msg)).collect();
        let coeffs = scheme.lagrange_coeffs(&indices).unwrap();
        let aggregate = scheme.recover_signature(&shares, &coeffs).unwrap();
        assert!(scheme.verify(&msg, &aggregate, &common_public_key()));
    }

    #[test]
    fn recovery_with_forged_share_fails_aggregate() {
        let scheme = ThresholdScheme::new(3, 4).unwrap();
        let msg = message();
        let indices = [1u64, 2, 3];

        let mut shares: Vec<Signature> = indices.iter().map(|i| share(*i).sign(&msg)).collect();
        // node 3 signs a different message
        shares[2] = share(3).sign(&crate::sha256(b"other"));

        let coeffs = scheme.lagrange_coeffs(&indices).unwrap();
        let aggregate = scheme.recover_signature(&shares, &coeffs).unwrap();
        assert!(!scheme.verify(&msg, &aggregate, &common_public_key()));
    }

    #[test]
    fn lagrange_rejects_bad_index_sets() {
        let scheme = ThresholdScheme::new(3, 4).unwrap();
        assert!(matches!(
            scheme.lagrange_coeffs(&[1, 2]),
            Err(CryptoError::CountMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(matches!(
            scheme.lagrange_coeffs(&[1, 2, 2]),
            Err(CryptoError::DuplicateIndex(2))
        ));
        assert!(matches!(
            scheme.lagrange_coeffs(&[0, 1, 2]),
            Err(CryptoError::ZeroIndex)
        ));
    }

    #[test]
    fn supermajority_threshold() {
        assert_eq!(ThresholdScheme::supermajority(3), 2);
        assert_eq!(ThresholdScheme::supermajority(4), 3);
        assert_eq!(ThresholdScheme::supermajority(7), 5);
        assert_eq!(ThresholdScheme::supermajority(16), 11);
    }

    #[test]
    fn invalid_scheme_parameters() {
        assert!(ThresholdScheme::new(0, 4).is_err());
        assert!(ThresholdScheme::new(5, 4).is_err());
        assert!(ThresholdScheme::new(1, 0).is_err());
    }

    #[test]
    fn signature_coordinate_round_trip() {
        let sig = share(1).sign(&message());
        let (x, y) = sig.to_coordinates();
        let decoded = Signature::from_coordinates(&x, &y).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn public_key_component_round_trip() {
        let pk = share(1).public_key();
        let components = pk.to_components();
        let decoded = PublicKey::from_components(&components).unwrap();
        assert_eq!(decoded, pk);
    }

    #[test]
    fn rejects_off_curve_coordinates() {
        let bogus = format!("0x{}", "22".repeat(48));
        assert!(Signature::from_coordinates(&bogus, &bogus).is_err());
    }
}
