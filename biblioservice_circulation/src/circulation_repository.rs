pub use in_memory_circulation_repository::InMemoryCirculationRepository;
pub use postgres_circulation_repository::{
    PostgresCirculationRepository, PostgresCirculationRepositoryConfig,
};
use serde::{Deserialize, Serialize};

use crate::api::{
    BookId, LoanId, LoanRecord, ReservationId, ReservationRecord, StudentDetails, UserId,
};

mod in_memory_circulation_repository;
mod postgres_circulation_repository;

#[derive(Debug, thiserror::Error)]
pub enum CirculationRepositoryError {
    #[error("Student {0} not found")]
    StudentNotFound(UserId),

    #[error("Username {0} already taken")]
    UsernameTaken(String),

    #[error("Student {0} still has active loans")]
    StudentHasActiveLoans(UserId),

    #[error("Loan {0} not found")]
    LoanNotFound(LoanId),

    #[error("Loan {0} already returned")]
    LoanAlreadyReturned(LoanId),

    #[error("Loan {0} reached its renewal limit")]
    RenewalLimitReached(LoanId),

    #[error("Book {0} is wanted by queued reservations")]
    BookWantedByQueue(BookId),

    #[error("Student {0} already borrowed book {1}")]
    LoanAlreadyOpen(UserId, BookId),

    #[error("No copy of book {0} is available")]
    NoCopyAvailable(BookId),

    #[error("Student {0} already has a reservation for book {1}")]
    AlreadyReserved(UserId, BookId),

    #[error("Reservation {0} not found")]
    ReservationNotFound(ReservationId),

    #[error("Failed to deserialize record: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Other error {0}")]
    Other(String),
}

/// A student account as stored, including the bcrypt hash.
/// Only `StudentDetails` ever leaves the service
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StudentRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

impl StudentRecord {
    pub fn details(&self) -> StudentDetails {
        StudentDetails {
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

/// A reservation that became ready for pickup as a side effect of another operation
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HoldNotice {
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub book_id: BookId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReturnOutcome {
    pub book_id: BookId,
    pub promoted: Option<HoldNotice>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BookUsage {
    pub active_loans: i64,
    pub ready_holds: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExpirySweep {
    pub expired: u64,
    pub promoted: Vec<HoldNotice>,
}

#[async_trait::async_trait]
pub trait CirculationRepository: Send + Sync {
    async fn add_student(&self, record: StudentRecord)
        -> Result<UserId, CirculationRepositoryError>;

    async fn get_student(&self, id: UserId) -> Result<StudentDetails, CirculationRepositoryError>;

    async fn get_student_by_username(
        &self,
        username: String,
    ) -> Result<Option<(UserId, StudentRecord)>, CirculationRepositoryError>;

    async fn get_all_student_ids(&self) -> Result<Vec<UserId>, CirculationRepositoryError>;

    /// Removes a student that has no open loans and cancels their active
    /// reservations, promoting queued reservations freed by cancelled holds
    async fn remove_student(
        &self,
        id: UserId,
        hold_deadline: i64,
    ) -> Result<(), CirculationRepositoryError>;

    /// Opens a loan. A ready hold of the student for this book is consumed in
    /// the same operation; otherwise a copy must be free once open loans and
    /// ready holds are subtracted from `total_copies`
    async fn open_loan(
        &self,
        user_id: UserId,
        book_id: BookId,
        borrowed_at: i64,
        due_at: i64,
        total_copies: i32,
    ) -> Result<LoanId, CirculationRepositoryError>;

    /// Closes a loan and, in the same operation, promotes the head of the
    /// book's pending queue to ready
    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: i64,
        hold_deadline: i64,
    ) -> Result<ReturnOutcome, CirculationRepositoryError>;

    /// Extends the due date, refusing once the renewal limit is reached or
    /// while anyone is queued for the book
    async fn renew_loan(
        &self,
        loan_id: LoanId,
        extension_seconds: i64,
        max_renewals: i32,
    ) -> Result<i64, CirculationRepositoryError>;

    async fn get_loan(&self, loan_id: LoanId) -> Result<LoanRecord, CirculationRepositoryError>;

    async fn list_active_loans(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError>;

    async fn list_all_active_loans(&self) -> Result<Vec<LoanRecord>, CirculationRepositoryError>;

    async fn list_loan_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError>;

    async fn count_active_loans(&self, user_id: UserId)
        -> Result<i64, CirculationRepositoryError>;

    async fn book_usage(&self, book_id: BookId) -> Result<BookUsage, CirculationRepositoryError>;

    /// Appends the student to the book's queue and returns the assigned
    /// reservation id with its 1-based queue rank
    async fn add_reservation(
        &self,
        user_id: UserId,
        book_id: BookId,
        reserved_at: i64,
    ) -> Result<(ReservationId, i64), CirculationRepositoryError>;

    /// Cancels an active reservation of the student. Cancelling a ready hold
    /// promotes the next queued reservation in the same operation
    async fn cancel_reservation(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        hold_deadline: i64,
    ) -> Result<Option<HoldNotice>, CirculationRepositoryError>;

    async fn list_reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError>;

    async fn list_queue_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError>;

    /// Expires ready holds past their deadline and promotes queued
    /// reservations for the freed copies, one atomic sweep
    async fn expire_ready_holds(
        &self,
        now: i64,
        hold_deadline: i64,
    ) -> Result<ExpirySweep, CirculationRepositoryError>;
}
