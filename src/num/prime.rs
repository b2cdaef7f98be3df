use super::bigint::BigInt;
use super::modular::{Barrett, Montgomery};

const SMALL_PRIMES: [u32; 13] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41];

/// Miller-Rabin over the first thirteen prime bases.
///
/// Deterministic below 3.3 * 10^24; a probable-prime test above that.
pub fn is_probable_prime(candidate: &BigInt) -> bool {
    if candidate.signum() <= 0 {
        return false;
    }
    if let Some(small) = candidate.to_u64()
        && small < 2
    {
        return false;
    }
    for prime in SMALL_PRIMES {
        let prime = BigInt::from_u64(u64::from(prime));
        if *candidate == prime {
            return true;
        }
        if candidate
            .div_mod_floor(&prime)
            .is_some_and(|(_, remainder)| remainder.is_zero())
        {
            return false;
        }
    }

    let one = BigInt::one();
    let minus_one = candidate - &one;
    let mut odd = minus_one.clone();
    let mut twos = 0u64;
    while !odd.is_odd() {
        odd = odd.shr(1);
        twos += 1;
    }

    // Candidates that reach here are odd, so Montgomery always applies.
    let Some(context) = Montgomery::new(candidate) else {
        return false;
    };
    let Some(fallback) = Barrett::new(candidate) else {
        return false;
    };

    'bases: for base in SMALL_PRIMES {
        let mut x = context.pow(&BigInt::from_u64(u64::from(base)), &odd);
        if x == one || x == minus_one {
            continue;
        }
        for _ in 1..twos {
            x = fallback.mul(&x, &x);
            if x == minus_one {
                continue 'bases;
            }
            if x == one {
                return false;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime(value: i64) -> bool {
        is_probable_prime(&BigInt::from_i64(value))
    }

    #[test]
    fn small_values() {
        let primes = (0..60).filter(|value| is_prime(*value)).collect::<Vec<_>>();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59]);
    }

    #[test]
    fn carmichael_numbers_are_rejected() {
        for value in [561, 1105, 1729, 2465, 2821, 6601, 8911] {
            assert!(!is_prime(value), "{value}");
        }
    }

    #[test]
    fn mersenne_prime() {
        let m127 = &BigInt::from_i64(2).pow(127) - &BigInt::one();
        assert!(is_probable_prime(&m127));
        let m128 = &BigInt::from_i64(2).pow(128) - &BigInt::one();
        assert!(!is_probable_prime(&m128));
    }
}
