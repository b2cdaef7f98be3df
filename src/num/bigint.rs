//! Signed arbitrary-precision integers.
//!
//! A value is a sign flag plus a little-endian magnitude of 32-bit limbs.
//! The magnitude never carries high zero limbs and zero is never negative,
//! so derived `Eq`/`Hash` agree with numeric equality.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

const LIMB_BITS: u64 = 32;
const LIMB_BASE: f64 = 4_294_967_296.0;
const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BigInt {
    negative: bool,
    magnitude: Vec<u32>,
}

impl BigInt {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn one() -> Self {
        Self::from_u64(1)
    }

    pub(crate) fn from_parts(negative: bool, mut magnitude: Vec<u32>) -> Self {
        trim(&mut magnitude);
        let negative = negative && !magnitude.is_empty();
        Self {
            negative,
            magnitude,
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_parts(false, vec![value as u32, (value >> 32) as u32])
    }

    pub fn from_i64(value: i64) -> Self {
        let magnitude = value.unsigned_abs();
        Self::from_parts(value < 0, vec![magnitude as u32, (magnitude >> 32) as u32])
    }

    /// Truncates toward zero; `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let truncated = value.trunc();
        if truncated.abs() < 9.0e18 {
            return Some(Self::from_i64(truncated as i64));
        }
        let bits = truncated.abs().to_bits();
        let exponent = ((bits >> 52) & 0x7ff) as u64 - 1075;
        let mantissa = (bits & ((1 << 52) - 1)) | (1 << 52);
        let magnitude = Self::from_u64(mantissa).shl(exponent);
        Some(if truncated < 0.0 { -magnitude } else { magnitude })
    }

    pub(crate) fn magnitude(&self) -> &[u32] {
        &self.magnitude
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_empty()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_odd(&self) -> bool {
        self.magnitude.first().is_some_and(|limb| limb & 1 == 1)
    }

    pub fn signum(&self) -> i32 {
        match (self.is_zero(), self.negative) {
            (true, _) => 0,
            (false, true) => -1,
            (false, false) => 1,
        }
    }

    pub fn abs(&self) -> Self {
        Self {
            negative: false,
            magnitude: self.magnitude.clone(),
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        let magnitude = self.to_magnitude_u64()?;
        if self.negative {
            if magnitude <= 1 << 63 {
                Some((magnitude as i64).wrapping_neg())
            } else {
                None
            }
        } else {
            i64::try_from(magnitude).ok()
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        if self.negative {
            return None;
        }
        self.to_magnitude_u64()
    }

    fn to_magnitude_u64(&self) -> Option<u64> {
        match self.magnitude.as_slice() {
            [] => Some(0),
            [low] => Some(u64::from(*low)),
            [low, high] => Some(u64::from(*low) | (u64::from(*high) << 32)),
            _ => None,
        }
    }

    /// Nearest-ish `f64`; infinite when the value exceeds the float range.
    pub fn to_f64(&self) -> f64 {
        let len = self.magnitude.len();
        let top = len.min(3);
        let mut value = 0.0;
        for limb in self.magnitude[len - top..].iter().rev() {
            value = value * LIMB_BASE + f64::from(*limb);
        }
        let scale = (len - top) as i32 * LIMB_BITS as i32;
        let value = if scale == 0 {
            value
        } else {
            value * 2f64.powi(scale)
        };
        if self.negative { -value } else { value }
    }

    pub fn bit_length(&self) -> u64 {
        match self.magnitude.last() {
            None => 0,
            Some(top) => {
                (self.magnitude.len() as u64 - 1) * LIMB_BITS
                    + (LIMB_BITS - u64::from(top.leading_zeros()))
            }
        }
    }

    pub fn pow(&self, mut exponent: u64) -> Self {
        let mut result = Self::one();
        let mut base = self.clone();
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = &result * &base;
            }
            exponent >>= 1;
            if exponent > 0 {
                base = &base * &base;
            }
        }
        result
    }

    /// Quotient rounded toward zero; remainder takes the dividend's sign.
    pub fn div_rem_trunc(&self, divisor: &Self) -> Option<(Self, Self)> {
        if divisor.is_zero() {
            return None;
        }
        let (quotient, remainder) = mag_divmod(&self.magnitude, &divisor.magnitude);
        Some((
            Self::from_parts(self.negative != divisor.negative, quotient),
            Self::from_parts(self.negative, remainder),
        ))
    }

    /// Quotient rounded toward negative infinity; remainder takes the
    /// divisor's sign.
    pub fn div_mod_floor(&self, divisor: &Self) -> Option<(Self, Self)> {
        let (quotient, remainder) = self.div_rem_trunc(divisor)?;
        if !remainder.is_zero() && remainder.negative != divisor.negative {
            Some((&quotient - &Self::one(), &remainder + divisor))
        } else {
            Some((quotient, remainder))
        }
    }

    pub fn shl(&self, bits: u64) -> Self {
        if self.is_zero() {
            return Self::zero();
        }
        let limbs = (bits / LIMB_BITS) as usize;
        let mut magnitude = vec![0; limbs];
        magnitude.extend(shl_bits(&self.magnitude, (bits % LIMB_BITS) as u32));
        Self::from_parts(self.negative, magnitude)
    }

    /// Arithmetic shift: rounds toward negative infinity like `>>` on
    /// two's-complement integers.
    pub fn shr(&self, bits: u64) -> Self {
        let limbs = (bits / LIMB_BITS) as usize;
        if limbs >= self.magnitude.len() {
            return if self.negative {
                Self::from_i64(-1)
            } else {
                Self::zero()
            };
        }
        let shift = (bits % LIMB_BITS) as u32;
        let lost_low_bits = self.magnitude[..limbs].iter().any(|limb| *limb != 0)
            || (shift > 0 && self.magnitude[limbs] & ((1 << shift) - 1) != 0);
        let shifted = Self::from_parts(self.negative, shr_bits(&self.magnitude[limbs..], shift));
        if self.negative && lost_low_bits {
            &shifted - &Self::one()
        } else {
            shifted
        }
    }

    pub fn bitand(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| a & b)
    }

    pub fn bitor(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| a | b)
    }

    pub fn bitxor(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| a ^ b)
    }

    /// `~x == -x - 1`.
    pub fn not(&self) -> Self {
        &(-self) - &Self::one()
    }

    fn bitwise(&self, other: &Self, op: impl Fn(u32, u32) -> u32) -> Self {
        let width = self.magnitude.len().max(other.magnitude.len()) + 1;
        let left = self.to_twos_complement(width);
        let right = other.to_twos_complement(width);
        let limbs = left
            .iter()
            .zip(&right)
            .map(|(a, b)| op(*a, *b))
            .collect::<Vec<_>>();
        Self::from_twos_complement(limbs)
    }

    fn to_twos_complement(&self, width: usize) -> Vec<u32> {
        if !self.negative {
            let mut limbs = self.magnitude.clone();
            limbs.resize(width, 0);
            return limbs;
        }
        let mut limbs = mag_sub(&self.magnitude, &[1]);
        limbs.resize(width, 0);
        limbs.iter_mut().for_each(|limb| *limb = !*limb);
        limbs
    }

    fn from_twos_complement(mut limbs: Vec<u32>) -> Self {
        let negative = limbs.last().is_some_and(|top| top & 0x8000_0000 != 0);
        if !negative {
            return Self::from_parts(false, limbs);
        }
        limbs.iter_mut().for_each(|limb| *limb = !*limb);
        Self::from_parts(true, mag_add(&limbs, &[1]))
    }

    pub fn gcd(&self, other: &Self) -> Self {
        let mut a = self.abs();
        let mut b = other.abs();
        while !b.is_zero() {
            if let (Some(x), Some(y)) = (a.to_u64(), b.to_u64()) {
                return Self::from_u64(gcd_u64(x, y));
            }
            let (_, remainder) = mag_divmod(&a.magnitude, &b.magnitude);
            a = b;
            b = Self::from_parts(false, remainder);
        }
        a
    }

    /// Floor of the square root; `None` for negative values.
    pub fn isqrt(&self) -> Option<Self> {
        if self.negative {
            return None;
        }
        if self.is_zero() {
            return Some(Self::zero());
        }
        let mut x = Self::one().shl(self.bit_length().div_ceil(2));
        loop {
            let (quotient, _) = mag_divmod(&self.magnitude, &x.magnitude);
            let y = (&x + &Self::from_parts(false, quotient)).shr(1);
            if y >= x {
                return Some(x);
            }
            x = y;
        }
    }

    /// Parses an optional sign followed by digits in `radix` (2 to 36).
    pub fn parse_radix(text: &str, radix: u32) -> Option<Self> {
        if !(2..=36).contains(&radix) {
            return None;
        }
        let (negative, digits) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        if digits.is_empty() {
            return None;
        }
        let mut magnitude = Vec::new();
        for ch in digits.chars() {
            let digit = ch.to_digit(radix)?;
            mul_add_small(&mut magnitude, radix, digit);
        }
        Some(Self::from_parts(negative, magnitude))
    }

    pub fn to_str_radix(&self, radix: u32) -> String {
        assert!((2..=36).contains(&radix), "radix out of range");
        if self.is_zero() {
            return "0".to_string();
        }
        let mut chunk_digits = 1;
        let mut chunk = radix;
        while let Some(next) = chunk.checked_mul(radix) {
            chunk = next;
            chunk_digits += 1;
        }

        let mut remaining = self.magnitude.clone();
        let mut chunks = Vec::new();
        while !remaining.is_empty() {
            let (quotient, remainder) = divmod_small(&remaining, chunk);
            chunks.push(remainder);
            remaining = quotient;
        }

        let mut out = String::new();
        if self.negative {
            out.push('-');
        }
        for (index, value) in chunks.iter().rev().enumerate() {
            let digits = small_digits(*value, radix);
            if index > 0 {
                out.extend(std::iter::repeat_n('0', chunk_digits - digits.len()));
            }
            out.push_str(&digits);
        }
        out
    }
}

fn small_digits(mut value: u32, radix: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % radix) as usize]);
        value /= radix;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

fn gcd_u64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn trim(magnitude: &mut Vec<u32>) {
    while magnitude.last() == Some(&0) {
        magnitude.pop();
    }
}

pub(crate) fn mag_cmp(a: &[u32], b: &[u32]) -> Ordering {
    a.len()
        .cmp(&b.len())
        .then_with(|| a.iter().rev().cmp(b.iter().rev()))
}

pub(crate) fn mag_add(a: &[u32], b: &[u32]) -> Vec<u32> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut out = Vec::with_capacity(long.len() + 1);
    let mut carry = 0u64;
    for (index, limb) in long.iter().enumerate() {
        let sum = u64::from(*limb) + u64::from(short.get(index).copied().unwrap_or(0)) + carry;
        out.push(sum as u32);
        carry = sum >> 32;
    }
    if carry > 0 {
        out.push(carry as u32);
    }
    trim(&mut out);
    out
}

/// `a - b` for `a >= b`.
pub(crate) fn mag_sub(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len());
    let mut borrow = 0i64;
    for (index, limb) in a.iter().enumerate() {
        let mut diff = i64::from(*limb) - i64::from(b.get(index).copied().unwrap_or(0)) - borrow;
        borrow = 0;
        if diff < 0 {
            diff += 1 << 32;
            borrow = 1;
        }
        out.push(diff as u32);
    }
    trim(&mut out);
    out
}

pub(crate) fn mag_mul(a: &[u32], b: &[u32]) -> Vec<u32> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0u32; a.len() + b.len()];
    for (i, x) in a.iter().enumerate() {
        let mut carry = 0u64;
        for (j, y) in b.iter().enumerate() {
            let product = u64::from(*x) * u64::from(*y) + u64::from(out[i + j]) + carry;
            out[i + j] = product as u32;
            carry = product >> 32;
        }
        out[i + b.len()] = carry as u32;
    }
    trim(&mut out);
    out
}

fn mul_add_small(magnitude: &mut Vec<u32>, factor: u32, addend: u32) {
    let mut carry = u64::from(addend);
    for limb in magnitude.iter_mut() {
        let value = u64::from(*limb) * u64::from(factor) + carry;
        *limb = value as u32;
        carry = value >> 32;
    }
    if carry > 0 {
        magnitude.push(carry as u32);
    }
}

fn divmod_small(a: &[u32], divisor: u32) -> (Vec<u32>, u32) {
    let mut quotient = vec![0u32; a.len()];
    let mut remainder = 0u64;
    for index in (0..a.len()).rev() {
        let current = (remainder << 32) | u64::from(a[index]);
        quotient[index] = (current / u64::from(divisor)) as u32;
        remainder = current % u64::from(divisor);
    }
    trim(&mut quotient);
    (quotient, remainder as u32)
}

/// Shifts left by `shift < 32` bits; the result has exactly one extra limb.
fn shl_bits(a: &[u32], shift: u32) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len() + 1);
    let mut carry = 0u32;
    for limb in a {
        if shift == 0 {
            out.push(*limb);
        } else {
            out.push((limb << shift) | carry);
            carry = limb >> (32 - shift);
        }
    }
    out.push(carry);
    out
}

fn shr_bits(a: &[u32], shift: u32) -> Vec<u32> {
    if shift == 0 {
        return a.to_vec();
    }
    let mut out = vec![0u32; a.len()];
    for index in 0..a.len() {
        let high = a.get(index + 1).copied().unwrap_or(0);
        out[index] = (a[index] >> shift) | (high << (32 - shift));
    }
    trim(&mut out);
    out
}

/// Magnitude division (Knuth, algorithm D).
pub(crate) fn mag_divmod(a: &[u32], b: &[u32]) -> (Vec<u32>, Vec<u32>) {
    if mag_cmp(a, b) == Ordering::Less {
        return (Vec::new(), a.to_vec());
    }
    if b.len() == 1 {
        let (quotient, remainder) = divmod_small(a, b[0]);
        let remainder = if remainder == 0 {
            Vec::new()
        } else {
            vec![remainder]
        };
        return (quotient, remainder);
    }

    let shift = b[b.len() - 1].leading_zeros();
    let divisor = shl_bits(b, shift);
    let divisor = &divisor[..b.len()];
    let mut dividend = shl_bits(a, shift);
    let n = divisor.len();
    let m = a.len() - n;
    let mut quotient = vec![0u32; m + 1];
    let top = u64::from(divisor[n - 1]);
    let next = u64::from(divisor[n - 2]);
    const BASE: u64 = 1 << 32;

    for j in (0..=m).rev() {
        let numerator = (u64::from(dividend[j + n]) << 32) | u64::from(dividend[j + n - 1]);
        let mut qhat = numerator / top;
        let mut rhat = numerator % top;
        while qhat >= BASE || qhat * next > ((rhat << 32) | u64::from(dividend[j + n - 2])) {
            qhat -= 1;
            rhat += top;
            if rhat >= BASE {
                break;
            }
        }

        let mut borrow = 0i64;
        let mut carry = 0u64;
        for i in 0..n {
            let product = qhat * u64::from(divisor[i]) + carry;
            carry = product >> 32;
            let diff = i64::from(dividend[i + j]) - borrow - (product & 0xffff_ffff) as i64;
            dividend[i + j] = diff as u32;
            borrow = i64::from(diff < 0);
        }
        let diff = i64::from(dividend[j + n]) - borrow - carry as i64;
        dividend[j + n] = diff as u32;

        if diff < 0 {
            qhat -= 1;
            let mut carry = 0u64;
            for i in 0..n {
                let sum = u64::from(dividend[i + j]) + u64::from(divisor[i]) + carry;
                dividend[i + j] = sum as u32;
                carry = sum >> 32;
            }
            dividend[j + n] = dividend[j + n].wrapping_add(carry as u32);
        }
        quotient[j] = qhat as u32;
    }

    trim(&mut quotient);
    (quotient, shr_bits(&dividend[..n], shift))
}

fn add_signed(a_negative: bool, a: &[u32], b_negative: bool, b: &[u32]) -> BigInt {
    if a_negative == b_negative {
        return BigInt::from_parts(a_negative, mag_add(a, b));
    }
    match mag_cmp(a, b) {
        Ordering::Equal => BigInt::zero(),
        Ordering::Greater => BigInt::from_parts(a_negative, mag_sub(a, b)),
        Ordering::Less => BigInt::from_parts(b_negative, mag_sub(b, a)),
    }
}

impl Add for &BigInt {
    type Output = BigInt;

    fn add(self, other: &BigInt) -> BigInt {
        add_signed(self.negative, &self.magnitude, other.negative, &other.magnitude)
    }
}

impl Sub for &BigInt {
    type Output = BigInt;

    fn sub(self, other: &BigInt) -> BigInt {
        add_signed(self.negative, &self.magnitude, !other.negative, &other.magnitude)
    }
}

impl Mul for &BigInt {
    type Output = BigInt;

    fn mul(self, other: &BigInt) -> BigInt {
        BigInt::from_parts(
            self.negative != other.negative,
            mag_mul(&self.magnitude, &other.magnitude),
        )
    }
}

impl Neg for &BigInt {
    type Output = BigInt;

    fn neg(self) -> BigInt {
        BigInt::from_parts(!self.negative, self.magnitude.clone())
    }
}

impl Neg for BigInt {
    type Output = BigInt;

    fn neg(self) -> BigInt {
        BigInt::from_parts(!self.negative, self.magnitude)
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<u64> for BigInt {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => mag_cmp(&self.magnitude, &other.magnitude),
            (true, true) => mag_cmp(&other.magnitude, &self.magnitude),
        }
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_radix(10))
    }
}

impl fmt::Debug for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigInt({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(text: &str) -> BigInt {
        BigInt::parse_radix(text, 10).expect("valid decimal literal")
    }

    #[test]
    fn two_to_the_sixty_four() {
        let value = BigInt::from_i64(2).pow(64);
        assert_eq!(value.to_string(), "18446744073709551616");
        assert_eq!(value.to_i64(), None);
        assert_eq!(value.bit_length(), 65);
    }

    #[test]
    fn i64_boundaries_round_trip() {
        for value in [i64::MIN, i64::MIN + 1, -1, 0, 1, i64::MAX] {
            assert_eq!(BigInt::from_i64(value).to_i64(), Some(value));
        }
        assert_eq!((&BigInt::from_i64(i64::MAX) + &BigInt::one()).to_i64(), None);
    }

    #[test]
    fn floor_division_follows_divisor_sign() {
        let cases = [(7, 2, 3, 1), (-7, 2, -4, 1), (7, -2, -4, -1), (-7, -2, 3, -1)];
        for (a, b, q, r) in cases {
            let (quotient, remainder) = BigInt::from_i64(a)
                .div_mod_floor(&BigInt::from_i64(b))
                .expect("non-zero divisor");
            assert_eq!(quotient.to_i64(), Some(q), "{a} // {b}");
            assert_eq!(remainder.to_i64(), Some(r), "{a} % {b}");
        }
        assert!(BigInt::one().div_mod_floor(&BigInt::zero()).is_none());
    }

    #[test]
    fn long_division_reconstructs_dividend() {
        let dividend = big("123456789012345678901234567890123456789012345678901234567890");
        let divisor = big("98765432109876543210987654321");
        let (quotient, remainder) = dividend.div_mod_floor(&divisor).expect("non-zero divisor");
        assert!(remainder < divisor);
        assert_eq!(&(&quotient * &divisor) + &remainder, dividend);
        assert_eq!(quotient.to_string(), "1249999988609375000142382812499");
    }

    #[test]
    fn radix_formatting() {
        let value = big("255");
        assert_eq!(value.to_str_radix(16), "ff");
        assert_eq!(value.to_str_radix(2), "11111111");
        let huge = BigInt::from_i64(1).shl(100);
        assert_eq!(huge.to_str_radix(16), format!("1{}", "0".repeat(25)));
        assert_eq!(BigInt::parse_radix(&huge.to_str_radix(36), 36), Some(huge));
        assert_eq!(BigInt::parse_radix("12z", 10), None);
    }

    #[test]
    fn bitwise_on_negative_values() {
        let a = BigInt::from_i64(-12);
        let b = BigInt::from_i64(10);
        assert_eq!(a.bitand(&b).to_i64(), Some(-12 & 10));
        assert_eq!(a.bitor(&b).to_i64(), Some(-12 | 10));
        assert_eq!(a.bitxor(&b).to_i64(), Some(-12 ^ 10));
        assert_eq!(a.not().to_i64(), Some(!-12));
    }

    #[test]
    fn shifts_round_toward_negative_infinity() {
        assert_eq!(BigInt::from_i64(-5).shr(1).to_i64(), Some(-3));
        assert_eq!(BigInt::from_i64(-4).shr(1).to_i64(), Some(-2));
        assert_eq!(BigInt::from_i64(-1).shr(200).to_i64(), Some(-1));
        assert_eq!(BigInt::from_i64(3).shl(70).shr(70).to_i64(), Some(3));
    }

    #[test]
    fn gcd_and_isqrt() {
        let a = BigInt::from_i64(2).pow(80);
        let b = BigInt::from_i64(6).pow(20);
        assert_eq!(a.gcd(&b), BigInt::from_i64(2).pow(20));
        let square = big("152415787532388367504942236884722755800955129");
        assert_eq!(
            square.isqrt().map(|root| root.to_string()),
            Some("12345678901234567890123".to_string())
        );
        assert!(BigInt::from_i64(-4).isqrt().is_none());
    }

    #[test]
    fn float_conversion() {
        assert_eq!(BigInt::from_i64(2).pow(64).to_f64(), 18446744073709551616.0);
        assert_eq!(BigInt::from_f64(1e20).map(|v| v.to_string()), Some("100000000000000000000".into()));
        assert_eq!(BigInt::from_f64(-2.9).and_then(|v| v.to_i64()), Some(-2));
        assert!(BigInt::from_f64(f64::NAN).is_none());
    }
}
