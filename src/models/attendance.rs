use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers::{parse_enum, parse_uuid};
use crate::errors::AppError;
use crate::events::Auditable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Registered,
    CheckedIn,
    CheckedOut,
    Absent,
    Cancelled,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Registered => "REGISTERED",
            AttendanceStatus::CheckedIn => "CHECKED_IN",
            AttendanceStatus::CheckedOut => "CHECKED_OUT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTERED" => Ok(AttendanceStatus::Registered),
            "CHECKED_IN" => Ok(AttendanceStatus::CheckedIn),
            "CHECKED_OUT" => Ok(AttendanceStatus::CheckedOut),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            "CANCELLED" => Ok(AttendanceStatus::Cancelled),
            other => Err(format!("unknown attendance status '{other}'")),
        }
    }
}

/// Which operation a QR code may be redeemed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeType {
    CheckIn,
    CheckOut,
    Both,
}

impl CodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeType::CheckIn => "CHECK_IN",
            CodeType::CheckOut => "CHECK_OUT",
            CodeType::Both => "BOTH",
        }
    }

    pub fn admits(&self, operation: CodeType) -> bool {
        *self == CodeType::Both || *self == operation
    }
}

impl Default for CodeType {
    fn default() -> Self {
        CodeType::CheckIn
    }
}

impl FromStr for CodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECK_IN" => Ok(CodeType::CheckIn),
            "CHECK_OUT" => Ok(CodeType::CheckOut),
            "BOTH" => Ok(CodeType::Both),
            other => Err(format!("unknown code type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Uuid,
    pub status: AttendanceStatus,
    pub registered_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub check_in_gate_id: Option<String>,
    pub qr_code_used: Option<String>,
    #[schema(example = "QR")]
    pub check_in_method: Option<String>,
    pub notes: Option<String>,
    pub location_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for AttendanceRecord {
    fn resource_type() -> &'static str {
        "attendance"
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAttendanceRecord {
    pub id: String,
    pub activity_id: String,
    pub user_id: String,
    pub status: String,
    pub registered_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub check_in_gate_id: Option<String>,
    pub qr_code_used: Option<String>,
    pub check_in_method: Option<String>,
    pub notes: Option<String>,
    pub location_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const ATTENDANCE_COLUMNS: &str = "id, activity_id, user_id, status, registered_at, checked_in_at, checked_out_at, check_in_gate_id, qr_code_used, check_in_method, notes, location_verified, created_at, updated_at";

impl TryFrom<DbAttendanceRecord> for AttendanceRecord {
    type Error = AppError;

    fn try_from(value: DbAttendanceRecord) -> Result<Self, Self::Error> {
        Ok(AttendanceRecord {
            id: parse_uuid(&value.id)?,
            activity_id: parse_uuid(&value.activity_id)?,
            user_id: parse_uuid(&value.user_id)?,
            status: parse_enum(&value.status)?,
            registered_at: value.registered_at,
            checked_in_at: value.checked_in_at,
            checked_out_at: value.checked_out_at,
            check_in_gate_id: value.check_in_gate_id,
            qr_code_used: value.qr_code_used,
            check_in_method: value.check_in_method,
            notes: value.notes,
            location_verified: value.location_verified,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QrCode {
    pub id: Uuid,
    pub activity_id: Uuid,
    /// Signed token carried by the printed code
    pub code: String,
    pub gate_id: Option<String>,
    pub session_token: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub code_type: CodeType,
    pub generated_by_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Auditable for QrCode {
    fn resource_type() -> &'static str {
        "qr_code"
    }

    fn resource_id(&self) -> Uuid {
        self.id
    }

    fn audit_snapshot(&self) -> serde_json::Value {
        // the signed code itself stays out of the trail
        serde_json::json!({
            "activity_id": self.activity_id,
            "gate_id": self.gate_id,
            "code_type": self.code_type,
            "valid_from": self.valid_from,
            "valid_until": self.valid_until,
            "max_uses": self.max_uses,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbQrCode {
    pub id: String,
    pub activity_id: String,
    pub code: String,
    pub gate_id: Option<String>,
    pub session_token: Option<String>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub max_uses: Option<i64>,
    pub current_uses: i64,
    pub code_type: String,
    pub generated_by_id: String,
    pub created_at: DateTime<Utc>,
}

pub const QR_COLUMNS: &str = "id, activity_id, code, gate_id, session_token, valid_from, valid_until, is_active, max_uses, current_uses, code_type, generated_by_id, created_at";

impl TryFrom<DbQrCode> for QrCode {
    type Error = AppError;

    fn try_from(value: DbQrCode) -> Result<Self, Self::Error> {
        Ok(QrCode {
            id: parse_uuid(&value.id)?,
            activity_id: parse_uuid(&value.activity_id)?,
            code: value.code,
            gate_id: value.gate_id,
            session_token: value.session_token,
            valid_from: value.valid_from,
            valid_until: value.valid_until,
            is_active: value.is_active,
            max_uses: value.max_uses,
            current_uses: value.current_uses,
            code_type: parse_enum(&value.code_type)?,
            generated_by_id: parse_uuid(&value.generated_by_id)?,
            created_at: value.created_at,
        })
    }
}

/// Gate-scoped session a QR code can be bound to.
#[derive(Debug, Clone, FromRow)]
pub struct AttendanceSession {
    pub id: String,
    pub activity_id: String,
    pub gate_id: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegistrationRequest {
    pub activity_id: Uuid,
    #[schema(example = "Looking forward to this activity")]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckInRequest {
    /// Signed QR token scanned at the gate
    pub qr_code: String,
    #[schema(example = "Arrived on time")]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QrCodeCreateRequest {
    pub activity_id: Uuid,
    #[schema(example = "main")]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub code_type: CodeType,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[schema(example = 100)]
    pub max_uses: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AttendanceStats {
    pub activity_id: Uuid,
    pub total_registered: i64,
    pub checked_in: i64,
    pub checked_out: i64,
    pub absent: i64,
    #[schema(example = 93.33)]
    pub attendance_rate: f64,
}

impl AttendanceStats {
    pub fn new(activity_id: Uuid, total: i64, checked_in: i64, checked_out: i64, absent: i64) -> Self {
        let attendance_rate = if total == 0 {
            0.0
        } else {
            ((checked_in as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        };

        Self {
            activity_id,
            total_registered: total,
            checked_in,
            checked_out,
            absent,
            attendance_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_admits_either_operation() {
        assert!(CodeType::Both.admits(CodeType::CheckIn));
        assert!(CodeType::Both.admits(CodeType::CheckOut));
        assert!(CodeType::CheckIn.admits(CodeType::CheckIn));
        assert!(!CodeType::CheckIn.admits(CodeType::CheckOut));
        assert!(!CodeType::CheckOut.admits(CodeType::CheckIn));
    }

    #[test]
    fn code_type_wire_format() {
        assert_eq!(serde_json::to_value(CodeType::CheckIn).unwrap(), "CHECK_IN");
        assert_eq!("BOTH".parse::<CodeType>().unwrap(), CodeType::Both);
    }

    #[test]
    fn attendance_rate_rounds_to_two_decimals() {
        let id = Uuid::new_v4();
        assert_eq!(AttendanceStats::new(id, 3, 2, 0, 1).attendance_rate, 66.67);
        assert_eq!(AttendanceStats::new(id, 30, 28, 27, 2).attendance_rate, 93.33);
        assert_eq!(AttendanceStats::new(id, 0, 0, 0, 0).attendance_rate, 0.0);
    }
}
