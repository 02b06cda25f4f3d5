//! JobCodec - JobRecord と永続化ドキュメントの相互変換
//!
//! # ドキュメント形式
//! ストアには JSON ドキュメントとして保存します。
//! ```json
//! {
//!   "job_id": "job-01HV...",
//!   "start_date": 1700000000,
//!   "end_date": null,
//!   "total_tasks": 3,
//!   "ended_tasks": 1,
//!   "weight_exponent": 3,
//!   "active_weight": "0xc"
//! }
//! ```
//! `active_weight` は上限がないため 16 進文字列で保存する。
//!
//! decode 時に不変条件を検査し、壊れたドキュメントを Tracker に渡さない。

use super::job::{JobRecord, ROOT_EXPONENT};

/// CodecError はドキュメント変換のエラー
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed job document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job document violates invariant: {0}")]
    Invariant(&'static str),
}

/// 不変条件を満たさないレコードは書き込ませない
pub fn encode(record: &JobRecord) -> Result<Vec<u8>, CodecError> {
    check(record)?;
    Ok(serde_json::to_vec(record)?)
}

pub fn decode(bytes: &[u8]) -> Result<JobRecord, CodecError> {
    let record: JobRecord = serde_json::from_slice(bytes)?;
    check(&record)?;
    Ok(record)
}

fn check(record: &JobRecord) -> Result<(), CodecError> {
    if record.total_tasks < 1 {
        return Err(CodecError::Invariant("total_tasks must be at least 1"));
    }
    if record.weight_exponent < ROOT_EXPONENT {
        return Err(CodecError::Invariant("weight_exponent must be at least 1"));
    }
    if record
        .active_weight
        .outstanding()
        .last()
        .is_some_and(|&e| e > record.weight_exponent)
    {
        return Err(CodecError::Invariant(
            "active_weight holds a weight that was never issued",
        ));
    }
    if record.is_complete() && !record.active_weight.is_zero() {
        return Err(CodecError::Invariant(
            "completed job still has outstanding weight",
        ));
    }
    Ok(())
}
