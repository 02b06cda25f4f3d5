//! Job identifier.
//!
//! # ULID ベースの ID
//! JobId は ULID をラップした強い型です。
//! - **時刻でソート可能**: 生成順に並ぶのでストアのキーとして扱いやすい
//! - **分散生成可能**: 調整なしで複数ノード（複数の FaaS インスタンス）で生成できる
//!
//! 永続化・ログ出力では `job-<ULID>` 形式の文字列として扱います。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of a Job (one tree of tasks whose completion is tracked).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(Ulid);

impl JobId {
    /// ULID から JobId を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.0)
    }
}

/// JobId の文字列表現が不正
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id '{0}'")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    /// `job-<ULID>` と素の `<ULID>` の両方を受け付ける
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

impl TryFrom<String> for JobId {
    type Error = ParseJobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_job_prefix() {
        let ulid = Ulid::new();
        let id = JobId::from_ulid(ulid);
        assert_eq!(id.to_string(), format!("job-{ulid}"));
    }

    #[test]
    fn parses_with_and_without_prefix() {
        let id = JobId::from_ulid(Ulid::new());
        let with_prefix: JobId = id.to_string().parse().unwrap();
        let bare: JobId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(with_prefix, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "job-not-a-ulid".parse::<JobId>().unwrap_err();
        assert_eq!(err, ParseJobIdError("job-not-a-ulid".to_string()));
    }

    #[test]
    fn serializes_as_prefixed_string() {
        let id = JobId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_are_sortable_by_creation_time() {
        let id1 = JobId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = JobId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }
}
