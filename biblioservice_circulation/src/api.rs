use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type UserId = i32;
pub type BookId = i32;
pub type LoanId = i32;
pub type ReservationId = i32;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RegisterStudentRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Public view of a student account, never carries the password hash
pub struct StudentDetails {
    pub username: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// A loan as stored: instants are epoch seconds
pub struct LoanRecord {
    pub loan_id: LoanId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub borrowed_at: i64,
    pub due_at: i64,
    pub returned_at: Option<i64>,
    pub renewals: i32,
}

impl LoanRecord {
    /// A loan is overdue while it is open past its due date.
    /// This is the only place the flag is derived
    pub fn is_overdue_at(&self, now: i64) -> bool {
        self.returned_at.is_none() && self.due_at < now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// An open loan decorated with the server derived overdue flag
pub struct ActiveLoan {
    pub loan_id: LoanId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub borrowed_at: i64,
    pub due_at: i64,
    pub renewals: i32,
    pub overdue: bool,
}

impl ActiveLoan {
    pub fn from_record(record: LoanRecord, now: i64) -> Self {
        let overdue = record.is_overdue_at(now);
        Self {
            loan_id: record.loan_id,
            book_id: record.book_id,
            user_id: record.user_id,
            borrowed_at: record.borrowed_at,
            due_at: record.due_at,
            renewals: record.renewals,
            overdue,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Lifecycle of a reservation, stored with the original French wire values
pub enum ReservationStatus {
    #[serde(rename = "en_attente")]
    Pending,
    #[serde(rename = "prete")]
    Ready,
    #[serde(rename = "expiree")]
    Expired,
    #[serde(rename = "annulee")]
    Cancelled,
    #[serde(rename = "transformee")]
    Converted,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "en_attente",
            ReservationStatus::Ready => "prete",
            ReservationStatus::Expired => "expiree",
            ReservationStatus::Cancelled => "annulee",
            ReservationStatus::Converted => "transformee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en_attente" => Some(ReservationStatus::Pending),
            "prete" => Some(ReservationStatus::Ready),
            "expiree" => Some(ReservationStatus::Expired),
            "annulee" => Some(ReservationStatus::Cancelled),
            "transformee" => Some(ReservationStatus::Converted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReservationRecord {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub user_id: UserId,
    pub status: ReservationStatus,
    pub reserved_at: i64,
    /// Set while the reservation is ready for pickup
    pub ready_until: Option<i64>,
    /// 1-based rank in the pending queue; None once the reservation left the queue
    pub queue_rank: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct ReserveResponse {
    pub reservation_id: ReservationId,
    pub queue_rank: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct RenewalResponse {
    pub due_at: i64,
}
