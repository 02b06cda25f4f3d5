//! Weights - 2 のべき乗による重み付き参照カウント
//!
//! 各タスクは attach 時に `2^e` の重みを受け取り、detach 時にそれを返却します。
//! `e` はジョブごとに単調増加するため、新しい重みは過去に発行された全ての重みの
//! 合計より常に大きくなります（`2^1 + ... + 2^(e-1) = 2^e - 2 < 2^e`）。
//!
//! # 表現
//! - **Weight**: 指数 `e` だけを保持（値は `2^e`）
//! - **ActiveWeight**: 未返却の重みの合計。attach 回数に上限がないため
//!   64-bit limb の可変長整数（little-endian）で保持する
//!
//! 発行される重みは互いに異なる 2 のべき乗なので、ActiveWeight の 2 進表現の
//! 立っているビットがそのまま「未返却のタスクの指数」の集合になります。

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const LIMB_BITS: u32 = u64::BITS;

/// Power-of-two weight held by one attached task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight {
    exponent: u32,
}

impl Weight {
    pub fn from_exponent(exponent: u32) -> Self {
        Self { exponent }
    }

    pub fn exponent(self) -> u32 {
        self.exponent
    }

    /// `2^e` as a machine integer, if it fits.
    pub fn value(self) -> Option<u128> {
        1u128.checked_shl(self.exponent)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "2^{}", self.exponent),
        }
    }
}

/// Returned when releasing a weight that is not currently outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underflow;

/// Sum of the weights of all outstanding tasks of a job.
///
/// Invariant: `limbs` has no trailing zero limb, so zero is the empty vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveWeight {
    limbs: Vec<u64>,
}

impl ActiveWeight {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    /// `self += 2^e`
    pub fn add(&mut self, weight: Weight) {
        let (mut idx, bit) = split(weight.exponent);
        if self.limbs.len() <= idx {
            self.limbs.resize(idx + 1, 0);
        }
        let (sum, mut carry) = self.limbs[idx].overflowing_add(1u64 << bit);
        self.limbs[idx] = sum;
        while carry {
            idx += 1;
            if idx == self.limbs.len() {
                self.limbs.push(1);
                break;
            }
            let (sum, c) = self.limbs[idx].overflowing_add(1);
            self.limbs[idx] = sum;
            carry = c;
        }
    }

    /// `self -= 2^e`, only when `2^e` is one of the outstanding weights.
    ///
    /// Outstanding weights are distinct powers of two, so a clear bit means the weight was
    /// already released (or never issued) even if the total would stay non-negative.
    /// On error `self` is left unchanged.
    pub fn release(&mut self, weight: Weight) -> Result<(), Underflow> {
        if !self.contains(weight) {
            return Err(Underflow);
        }
        let (idx, bit) = split(weight.exponent);
        self.limbs[idx] &= !(1u64 << bit);
        self.normalize();
        Ok(())
    }

    /// Is `2^e` currently part of the sum?
    pub fn contains(&self, weight: Weight) -> bool {
        let (idx, bit) = split(weight.exponent);
        self.limbs
            .get(idx)
            .is_some_and(|limb| limb & (1u64 << bit) != 0)
    }

    /// Exponents of the outstanding weights, ascending.
    pub fn outstanding(&self) -> Vec<u32> {
        let mut exponents = Vec::new();
        for (idx, &limb) in self.limbs.iter().enumerate() {
            let mut rest = limb;
            while rest != 0 {
                let bit = rest.trailing_zeros();
                exponents.push(idx as u32 * LIMB_BITS + bit);
                rest &= rest - 1;
            }
        }
        exponents
    }

    /// The sum as a machine integer, if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        match self.limbs.as_slice() {
            [] => Some(0),
            [lo] => Some(u128::from(*lo)),
            [lo, hi] => Some(u128::from(*lo) | (u128::from(*hi) << 64)),
            _ => None,
        }
    }

    fn normalize(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }

    fn to_hex(&self) -> String {
        let mut out = String::from("0x");
        match self.limbs.split_last() {
            None => out.push('0'),
            Some((top, rest)) => {
                out.push_str(&format!("{top:x}"));
                for limb in rest.iter().rev() {
                    out.push_str(&format!("{limb:016x}"));
                }
            }
        }
        out
    }

    fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut limbs = Vec::with_capacity(digits.len().div_ceil(16));
        let mut end = digits.len();
        while end > 0 {
            let start = end.saturating_sub(16);
            limbs.push(u64::from_str_radix(&digits[start..end], 16).ok()?);
            end = start;
        }
        let mut weight = Self { limbs };
        weight.normalize();
        Some(weight)
    }
}

impl From<Weight> for ActiveWeight {
    fn from(weight: Weight) -> Self {
        let mut active = Self::zero();
        active.add(weight);
        active
    }
}

impl fmt::Display for ActiveWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u128() {
            Some(v) => write!(f, "{v}"),
            None => f.write_str(&self.to_hex()),
        }
    }
}

impl Serialize for ActiveWeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ActiveWeight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid active weight '{s}'")))
    }
}

fn split(exponent: u32) -> (usize, u32) {
    ((exponent / LIMB_BITS) as usize, exponent % LIMB_BITS)
}
