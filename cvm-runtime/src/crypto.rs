//! Cryptographic primitives used by the builtins
//!
//! - Pedersen and Poseidon are supplied by the embedder through [`PairHasher`]
//!   and [`Permutation`]; the builtins only fix how memory cells feed them.
//! - Keccak-f[1600] comes from the `keccak` crate.
//! - STARK curve arithmetic and ECDSA live here, because the EC-op builtin
//!   must fail exactly where the circuit cannot compute.
//!
//! # Curve
//!
//! y^2 = x^3 + ALPHA * x + BETA over the field, with ALPHA = 1.

use cvm_spec::Felt;
use num_bigint::BigUint;
use num_traits::Zero;
use std::sync::LazyLock;

/// Two-to-one hash over field elements (the pedersen builtin's function)
pub trait PairHasher {
    fn hash(&self, x: &Felt, y: &Felt) -> Felt;
}

/// Fixed-width permutation over field elements (the poseidon builtin's function)
pub trait Permutation {
    /// Number of field elements in the state
    fn width(&self) -> usize;

    fn permute(&self, state: &mut [Felt]);
}

/// Signature check used by the ECDSA builtin
pub trait SignatureVerifier {
    fn verify(&self, public_key: &Felt, message: &Felt, r: &Felt, s: &Felt) -> bool;
}

fn felt_const(hex: &str) -> Felt {
    Felt::from_hex(hex).unwrap_or_else(|| panic!("invalid curve constant {hex}"))
}

pub static ALPHA: LazyLock<Felt> = LazyLock::new(Felt::one);

pub static BETA: LazyLock<Felt> = LazyLock::new(|| {
    felt_const("0x6f21413efbe40de150e596d72f7a8c5609ad26c15c915c1f4cdfcb99cee9e89")
});

/// Order of the curve's group
pub static EC_ORDER: LazyLock<BigUint> = LazyLock::new(|| {
    felt_const("0x800000000000010ffffffffffffffffb781126dcae7b2321e66a241adc64d2f").to_biguint()
});

/// Generator of the curve's group
pub static EC_GEN: LazyLock<(Felt, Felt)> = LazyLock::new(|| {
    (
        felt_const("0x1ef15c18599971b7beced415a40f0c7deacfd9b0d1819e03d723d8bc943cfca"),
        felt_const("0x5668060aa49730b7be4801df46ec62de53ecd11abe43a32873000c36e8dc1f"),
    )
});

/// Signatures are limited to 251-bit components
const N_ELEMENT_BITS_ECDSA: u64 = 251;

pub type EcPoint = (Felt, Felt);

pub fn point_on_curve(x: &Felt, y: &Felt) -> bool {
    let lhs = y * y;
    let rhs = &(&(x * x) * x) + &(&(&*ALPHA * x) + &*BETA);
    lhs == rhs
}

/// Adds two points with distinct x coordinates
pub fn ec_add(p: &EcPoint, q: &EcPoint) -> Option<EcPoint> {
    let slope = (&q.1 - &p.1).checked_div(&(&q.0 - &p.0))?;
    let x = &(&(&slope * &slope) - &p.0) - &q.0;
    let y = &(&slope * &(&p.0 - &x)) - &p.1;
    Some((x, y))
}

/// Doubles a point with a non-zero y coordinate
pub fn ec_double(p: &EcPoint) -> Option<EcPoint> {
    let numerator = &(&Felt::from(3u64) * &(&p.0 * &p.0)) + &*ALPHA;
    let slope = numerator.checked_div(&(&p.1 + &p.1))?;
    let x = &(&slope * &slope) - &(&p.0 + &p.0);
    let y = &(&slope * &(&p.0 - &x)) - &p.1;
    Some((x, y))
}

/// Computes `partial_sum + m * doubled_point` the way the EC-op circuit does:
/// one conditional add and one doubling per bit, for `height` bits.
///
/// Fails whenever the running sum and the doubled point share an x
/// coordinate, since the circuit cannot express that addition.
pub fn ec_op_impl(
    partial_sum: &EcPoint,
    doubled_point: &EcPoint,
    m: &Felt,
    height: u32,
) -> Result<EcPoint, String> {
    let mut partial_sum = partial_sum.clone();
    let mut doubled_point = doubled_point.clone();
    let mut m = m.to_biguint();
    let failure = |p: &EcPoint, q: &EcPoint, m: &BigUint| {
        format!(
            "Cannot apply EC operation: computation reached two points with the same x coordinate. \
             Attempting to compute P + m * Q where:\nP = ({}, {})\nm = {}\nQ = ({}, {}).",
            p.0, p.1, m, q.0, q.1
        )
    };
    let original = (partial_sum.clone(), doubled_point.clone(), m.clone());

    for _ in 0..height {
        if doubled_point.0 == partial_sum.0 {
            return Err(failure(&original.0, &original.1, &original.2));
        }
        if m.bit(0) {
            partial_sum = ec_add(&partial_sum, &doubled_point)
                .ok_or_else(|| failure(&original.0, &original.1, &original.2))?;
        }
        doubled_point = ec_double(&doubled_point)
            .ok_or_else(|| failure(&original.0, &original.1, &original.2))?;
        m >>= 1;
    }

    if !m.is_zero() {
        return Err(format!("Scalar {} does not fit in {} bits", original.2, height));
    }
    Ok(partial_sum)
}

/// Affine point with the identity, for general scalar multiplication
#[derive(Debug, Clone, PartialEq, Eq)]
enum Point {
    Infinity,
    Affine(EcPoint),
}

impl Point {
    fn add(&self, other: &Point) -> Point {
        match (self, other) {
            (Point::Infinity, p) | (p, Point::Infinity) => p.clone(),
            (Point::Affine(p), Point::Affine(q)) => {
                if p.0 == q.0 {
                    if p.1 == q.1 && !p.1.is_zero() {
                        ec_double(p).map_or(Point::Infinity, Point::Affine)
                    } else {
                        Point::Infinity
                    }
                } else {
                    ec_add(p, q).map_or(Point::Infinity, Point::Affine)
                }
            }
        }
    }

    fn neg(&self) -> Point {
        match self {
            Point::Infinity => Point::Infinity,
            Point::Affine((x, y)) => Point::Affine((x.clone(), -y)),
        }
    }

    fn mul(&self, scalar: &BigUint) -> Point {
        let mut result = Point::Infinity;
        let mut addend = self.clone();
        for i in 0..scalar.bits() {
            if scalar.bit(i) {
                result = result.add(&addend);
            }
            addend = addend.add(&addend);
        }
        result
    }
}

/// Point multiplication by a scalar, `None` for the identity
pub fn ec_mult(scalar: &BigUint, point: &EcPoint) -> Option<EcPoint> {
    match Point::Affine(point.clone()).mul(scalar) {
        Point::Infinity => None,
        Point::Affine(p) => Some(p),
    }
}

/// y coordinate for an x coordinate on the curve (the smaller root)
pub fn recover_y(x: &Felt) -> Option<Felt> {
    let rhs = &(&(x * x) * x) + &(&(&*ALPHA * x) + &*BETA);
    rhs.sqrt()
}

fn inv_mod_order(value: &BigUint) -> Option<BigUint> {
    let order = &*EC_ORDER;
    let reduced = value % order;
    if reduced.is_zero() {
        return None;
    }
    Some(reduced.modpow(&(order - 2u32), order))
}

/// ECDSA over the STARK curve. The public key is the x coordinate only;
/// both candidate y coordinates are tried.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarkEcdsa;

impl StarkEcdsa {
    /// Signs `message` with `private_key` using the caller-chosen nonce `k`.
    /// Returns `None` when the nonce yields a degenerate signature.
    pub fn sign(message: &Felt, private_key: &BigUint, k: &BigUint) -> Option<(Felt, Felt)> {
        let order = &*EC_ORDER;
        let r_point = ec_mult(k, &EC_GEN)?;
        let r = r_point.0.to_biguint();
        if r.is_zero() || r.bits() > N_ELEMENT_BITS_ECDSA {
            return None;
        }
        let z = message.to_biguint();
        let k_inv = inv_mod_order(k)?;
        let s = (k_inv * ((&z + &r * private_key) % order)) % order;
        if s.is_zero() {
            return None;
        }
        Some((Felt::new(r), Felt::new(s)))
    }

    /// Public key (x coordinate) for a private key
    pub fn public_key(private_key: &BigUint) -> Option<Felt> {
        ec_mult(private_key, &EC_GEN).map(|p| p.0)
    }
}

impl SignatureVerifier for StarkEcdsa {
    fn verify(&self, public_key: &Felt, message: &Felt, r: &Felt, s: &Felt) -> bool {
        let order = &*EC_ORDER;
        let (r_int, s_int, z) = (r.to_biguint(), s.to_biguint(), message.to_biguint());
        if r_int.is_zero() || r_int.bits() > N_ELEMENT_BITS_ECDSA {
            return false;
        }
        if s_int.is_zero() || s_int >= *order {
            return false;
        }
        if z.bits() > N_ELEMENT_BITS_ECDSA {
            return false;
        }
        let Some(w) = inv_mod_order(&s_int) else {
            return false;
        };
        if w.bits() > N_ELEMENT_BITS_ECDSA {
            return false;
        }
        let Some(y) = recover_y(public_key) else {
            return false;
        };

        let generator = Point::Affine(EC_GEN.clone());
        let key = Point::Affine((public_key.clone(), y));
        let u1 = (&z * &w) % order;
        let u2 = (&r_int * &w) % order;
        let zg = generator.mul(&u1);
        let rq = key.mul(&u2);

        // The key's y sign is unknown, so accept either u1*G + u2*Q or u1*G - u2*Q
        [zg.add(&rq), zg.add(&rq.neg())].iter().any(|candidate| match candidate {
            Point::Affine((x, _)) => x.to_biguint() % order == r_int,
            Point::Infinity => false,
        })
    }
}

/// Applies keccak-f[1600] to a 200-byte little-endian state
pub fn keccak_f1600_bytes(state: &[u8; 200]) -> [u8; 200] {
    let mut lanes = [0u64; 25];
    for (lane, chunk) in lanes.iter_mut().zip(state.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *lane = u64::from_le_bytes(word);
    }
    keccak::f1600(&mut lanes);
    let mut out = [0u8; 200];
    for (chunk, lane) in out.chunks_exact_mut(8).zip(lanes.iter()) {
        chunk.copy_from_slice(&lane.to_le_bytes());
    }
    out
}
