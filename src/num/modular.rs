//! Modular reduction contexts and exponentiation.
//!
//! Odd moduli use Montgomery multiplication; even moduli fall back to
//! Barrett reduction. Both operate on non-negative residues below the
//! modulus.

use std::cmp::Ordering;

use super::bigint::{BigInt, mag_cmp, mag_sub};

/// Barrett reduction for a fixed positive modulus.
#[derive(Debug, Clone)]
pub struct Barrett {
    modulus: BigInt,
    mu: BigInt,
    limbs: u64,
}

impl Barrett {
    pub fn new(modulus: &BigInt) -> Option<Self> {
        if modulus.signum() <= 0 {
            return None;
        }
        let limbs = modulus.magnitude().len() as u64;
        let (mu, _) = BigInt::one().shl(64 * limbs).div_mod_floor(modulus)?;
        Some(Self {
            modulus: modulus.clone(),
            mu,
            limbs,
        })
    }

    /// Reduces `value` where `0 <= value < modulus^2`.
    pub fn reduce(&self, value: &BigInt) -> BigInt {
        let q1 = value.shr(32 * (self.limbs - 1));
        let q3 = (&q1 * &self.mu).shr(32 * (self.limbs + 1));
        let mut remainder = value - &(&q3 * &self.modulus);
        while remainder >= self.modulus {
            remainder = &remainder - &self.modulus;
        }
        remainder
    }

    pub fn mul(&self, a: &BigInt, b: &BigInt) -> BigInt {
        self.reduce(&(a * b))
    }
}

/// Montgomery arithmetic for a fixed odd modulus with `R = 2^(32k)`.
#[derive(Debug, Clone)]
pub struct Montgomery {
    modulus: Vec<u32>,
    n_prime: u32,
    r_squared: BigInt,
}

impl Montgomery {
    pub fn new(modulus: &BigInt) -> Option<Self> {
        if modulus.signum() <= 0 || !modulus.is_odd() {
            return None;
        }
        let limbs = modulus.magnitude().to_vec();
        let low = limbs[0];
        // Newton iteration doubles the number of correct low bits each step.
        let mut inverse = 1u32;
        for _ in 0..5 {
            inverse = inverse.wrapping_mul(2u32.wrapping_sub(low.wrapping_mul(inverse)));
        }
        let (_, r_squared) = BigInt::one()
            .shl(64 * limbs.len() as u64)
            .div_mod_floor(modulus)?;
        Some(Self {
            modulus: limbs,
            n_prime: inverse.wrapping_neg(),
            r_squared,
        })
    }

    fn limbs(&self, value: &BigInt) -> Vec<u32> {
        let mut limbs = value.magnitude().to_vec();
        limbs.resize(self.modulus.len(), 0);
        limbs
    }

    /// `a * b * R^-1 mod m` for residues already below the modulus.
    pub fn mul(&self, a: &BigInt, b: &BigInt) -> BigInt {
        let k = self.modulus.len();
        let a = self.limbs(a);
        let b = self.limbs(b);
        let m = &self.modulus;
        let mut t = vec![0u32; k + 2];

        for &a_limb in &a {
            let mut carry = 0u64;
            for j in 0..k {
                let sum = u64::from(t[j]) + u64::from(a_limb) * u64::from(b[j]) + carry;
                t[j] = sum as u32;
                carry = sum >> 32;
            }
            let sum = u64::from(t[k]) + carry;
            t[k] = sum as u32;
            t[k + 1] = (sum >> 32) as u32;

            let factor = t[0].wrapping_mul(self.n_prime);
            let sum = u64::from(t[0]) + u64::from(factor) * u64::from(m[0]);
            let mut carry = sum >> 32;
            for j in 1..k {
                let sum = u64::from(t[j]) + u64::from(factor) * u64::from(m[j]) + carry;
                t[j - 1] = sum as u32;
                carry = sum >> 32;
            }
            let sum = u64::from(t[k]) + carry;
            t[k - 1] = sum as u32;
            t[k] = t[k + 1] + (sum >> 32) as u32;
            t[k + 1] = 0;
        }

        let mut result = t[..=k].to_vec();
        while result.last() == Some(&0) {
            result.pop();
        }
        if mag_cmp(&result, m) != Ordering::Less {
            result = mag_sub(&result, m);
        }
        BigInt::from_parts(false, result)
    }

    pub fn to_montgomery(&self, value: &BigInt) -> BigInt {
        self.mul(value, &self.r_squared)
    }

    pub fn from_montgomery(&self, value: &BigInt) -> BigInt {
        self.mul(value, &BigInt::one())
    }

    pub fn pow(&self, base: &BigInt, exponent: &BigInt) -> BigInt {
        let base = self.to_montgomery(base);
        let mut result = self.to_montgomery(&BigInt::one());
        for bit in (0..exponent.bit_length()).rev() {
            result = self.mul(&result, &result);
            if exponent.shr(bit).is_odd() {
                result = self.mul(&result, &base);
            }
        }
        self.from_montgomery(&result)
    }
}

/// `base ** exponent mod modulus` with Python's sign conventions: the result
/// has the sign of the modulus. `None` when the modulus is zero or the
/// exponent is negative and the base has no inverse.
pub fn mod_pow(base: &BigInt, exponent: &BigInt, modulus: &BigInt) -> Option<BigInt> {
    if modulus.is_zero() {
        return None;
    }
    let positive = modulus.abs();
    let (_, mut base) = base.div_mod_floor(&positive)?;
    let mut exponent = exponent.clone();
    if exponent.is_negative() {
        base = mod_inverse(&base, &positive)?;
        exponent = -exponent;
    }

    let result = if positive == BigInt::one() {
        BigInt::zero()
    } else if let Some(context) = Montgomery::new(&positive) {
        context.pow(&base, &exponent)
    } else {
        let context = Barrett::new(&positive)?;
        let mut result = BigInt::one();
        for bit in (0..exponent.bit_length()).rev() {
            result = context.mul(&result, &result);
            if exponent.shr(bit).is_odd() {
                result = context.mul(&result, &base);
            }
        }
        result
    };

    if modulus.is_negative() && !result.is_zero() {
        Some(&result - &positive)
    } else {
        Some(result)
    }
}

/// Multiplicative inverse of `value` modulo a positive `modulus`.
pub fn mod_inverse(value: &BigInt, modulus: &BigInt) -> Option<BigInt> {
    let (mut old_r, mut r) = (value.div_mod_floor(modulus)?.1, modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let (quotient, remainder) = old_r.div_mod_floor(&r)?;
        (old_r, r) = (r, remainder);
        let next = &old_s - &(&quotient * &s);
        (old_s, s) = (s, next);
    }
    if old_r != BigInt::one() {
        return None;
    }
    Some(old_s.div_mod_floor(modulus)?.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i64) -> BigInt {
        BigInt::from_i64(value)
    }

    #[test]
    fn montgomery_matches_naive_exponentiation() {
        let modulus = int(1_000_000_007);
        let expected = (0..20).fold(1i64, |acc, _| acc * 3 % 1_000_000_007);
        assert_eq!(mod_pow(&int(3), &int(20), &modulus), Some(int(expected)));
    }

    #[test]
    fn barrett_handles_even_moduli() {
        let modulus = BigInt::from_i64(2).pow(70);
        let result = mod_pow(&int(3), &int(100), &modulus).expect("non-zero modulus");
        let (_, expected) = int(3).pow(100).div_mod_floor(&modulus).expect("non-zero");
        assert_eq!(result, expected);
    }

    #[test]
    fn multi_limb_odd_modulus() {
        let modulus = &BigInt::from_i64(2).pow(127) - &BigInt::one();
        let base = BigInt::from_i64(2).pow(100);
        let result = mod_pow(&base, &int(5), &modulus).expect("non-zero modulus");
        let (_, expected) = base.pow(5).div_mod_floor(&modulus).expect("non-zero");
        assert_eq!(result, expected);
    }

    #[test]
    fn negative_modulus_and_exponent() {
        assert_eq!(mod_pow(&int(3), &int(2), &int(-7)), Some(int(-5)));
        assert_eq!(mod_pow(&int(3), &int(-1), &int(7)), Some(int(5)));
        assert_eq!(mod_pow(&int(2), &int(-1), &int(4)), None);
        assert_eq!(mod_pow(&int(2), &int(3), &int(0)), None);
    }
}
