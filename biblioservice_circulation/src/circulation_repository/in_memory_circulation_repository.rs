use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::api::{
    BookId, LoanId, LoanRecord, ReservationId, ReservationRecord, ReservationStatus,
    StudentDetails, UserId,
};
use crate::circulation_repository::{
    BookUsage, CirculationRepository, CirculationRepositoryError, ExpirySweep, HoldNotice,
    ReturnOutcome, StudentRecord,
};

#[derive(Debug, Clone)]
struct StoredReservation {
    book_id: BookId,
    user_id: UserId,
    position: i32,
    status: ReservationStatus,
    reserved_at: i64,
    ready_until: Option<i64>,
}

impl StoredReservation {
    fn is_active(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Pending | ReservationStatus::Ready
        )
    }
}

pub struct InMemoryCirculationRepository {
    students: parking_lot::RwLock<HashMap<UserId, StudentRecord>>,
    loans: parking_lot::RwLock<HashMap<LoanId, LoanRecord>>,
    reservations: parking_lot::RwLock<HashMap<ReservationId, StoredReservation>>,
    student_sequence: AtomicI32,
    loan_sequence: AtomicI32,
    reservation_sequence: AtomicI32,
}

impl Default for InMemoryCirculationRepository {
    fn default() -> Self {
        Self {
            students: Default::default(),
            loans: Default::default(),
            reservations: Default::default(),
            student_sequence: AtomicI32::new(1),
            loan_sequence: AtomicI32::new(1),
            reservation_sequence: AtomicI32::new(1),
        }
    }
}

fn head_of_queue(
    reservations: &HashMap<ReservationId, StoredReservation>,
    book_id: BookId,
) -> Option<ReservationId> {
    reservations
        .iter()
        .filter(|(_, r)| r.book_id == book_id && r.status == ReservationStatus::Pending)
        .min_by_key(|(_, r)| r.position)
        .map(|(&id, _)| id)
}

fn promote(
    reservations: &mut HashMap<ReservationId, StoredReservation>,
    reservation_id: ReservationId,
    hold_deadline: i64,
) -> HoldNotice {
    let reservation = reservations
        .get_mut(&reservation_id)
        .expect("promoted reservation must exist");
    reservation.status = ReservationStatus::Ready;
    reservation.ready_until = Some(hold_deadline);
    HoldNotice {
        reservation_id,
        user_id: reservation.user_id,
        book_id: reservation.book_id,
    }
}

fn pending_rank(
    reservations: &HashMap<ReservationId, StoredReservation>,
    book_id: BookId,
    position: i32,
) -> i64 {
    reservations
        .values()
        .filter(|r| {
            r.book_id == book_id
                && r.status == ReservationStatus::Pending
                && r.position <= position
        })
        .count() as i64
}

fn to_record(
    reservations: &HashMap<ReservationId, StoredReservation>,
    reservation_id: ReservationId,
    reservation: &StoredReservation,
) -> ReservationRecord {
    let queue_rank = (reservation.status == ReservationStatus::Pending)
        .then(|| pending_rank(reservations, reservation.book_id, reservation.position));
    ReservationRecord {
        reservation_id,
        book_id: reservation.book_id,
        user_id: reservation.user_id,
        status: reservation.status,
        reserved_at: reservation.reserved_at,
        ready_until: reservation.ready_until,
        queue_rank,
    }
}

#[async_trait::async_trait]
impl CirculationRepository for InMemoryCirculationRepository {
    async fn add_student(
        &self,
        record: StudentRecord,
    ) -> Result<UserId, CirculationRepositoryError> {
        let mut students = self.students.write();
        if students
            .values()
            .any(|existing| existing.username == record.username)
        {
            return Err(CirculationRepositoryError::UsernameTaken(record.username));
        }
        let id = self.student_sequence.fetch_add(1, Ordering::Relaxed);
        students.insert(id, record);
        Ok(id)
    }

    async fn get_student(&self, id: UserId) -> Result<StudentDetails, CirculationRepositoryError> {
        self.students
            .read()
            .get(&id)
            .map(StudentRecord::details)
            .ok_or(CirculationRepositoryError::StudentNotFound(id))
    }

    async fn get_student_by_username(
        &self,
        username: String,
    ) -> Result<Option<(UserId, StudentRecord)>, CirculationRepositoryError> {
        Ok(self
            .students
            .read()
            .iter()
            .find(|(_, record)| record.username == username)
            .map(|(&id, record)| (id, record.clone())))
    }

    async fn get_all_student_ids(&self) -> Result<Vec<UserId>, CirculationRepositoryError> {
        Ok(self.students.read().keys().cloned().collect())
    }

    async fn remove_student(
        &self,
        id: UserId,
        hold_deadline: i64,
    ) -> Result<(), CirculationRepositoryError> {
        let mut students = self.students.write();
        let loans = self.loans.read();
        let mut reservations = self.reservations.write();

        if loans
            .values()
            .any(|loan| loan.user_id == id && loan.returned_at.is_none())
        {
            return Err(CirculationRepositoryError::StudentHasActiveLoans(id));
        }

        if students.remove(&id).is_none() {
            return Err(CirculationRepositoryError::StudentNotFound(id));
        }

        let active: Vec<(ReservationId, ReservationStatus, BookId)> = reservations
            .iter()
            .filter(|(_, r)| r.user_id == id && r.is_active())
            .map(|(&res_id, r)| (res_id, r.status, r.book_id))
            .collect();

        for (res_id, status, book_id) in active {
            let reservation = reservations
                .get_mut(&res_id)
                .expect("reservation listed above");
            reservation.status = ReservationStatus::Cancelled;
            reservation.ready_until = None;

            // a cancelled hold frees a copy for the next in line
            if status == ReservationStatus::Ready {
                if let Some(next_id) = head_of_queue(&reservations, book_id) {
                    promote(&mut reservations, next_id, hold_deadline);
                }
            }
        }

        Ok(())
    }

    async fn open_loan(
        &self,
        user_id: UserId,
        book_id: BookId,
        borrowed_at: i64,
        due_at: i64,
        total_copies: i32,
    ) -> Result<LoanId, CirculationRepositoryError> {
        let mut loans = self.loans.write();
        let mut reservations = self.reservations.write();

        if loans
            .values()
            .any(|loan| loan.user_id == user_id && loan.book_id == book_id && loan.returned_at.is_none())
        {
            return Err(CirculationRepositoryError::LoanAlreadyOpen(user_id, book_id));
        }

        let ready_hold = reservations
            .iter()
            .find(|(_, r)| {
                r.book_id == book_id
                    && r.user_id == user_id
                    && r.status == ReservationStatus::Ready
            })
            .map(|(&res_id, _)| res_id);

        match ready_hold {
            Some(res_id) => {
                let reservation = reservations
                    .get_mut(&res_id)
                    .expect("reservation found above");
                reservation.status = ReservationStatus::Converted;
                reservation.ready_until = None;
            }
            None => {
                let active_loans = loans
                    .values()
                    .filter(|loan| loan.book_id == book_id && loan.returned_at.is_none())
                    .count() as i64;
                let ready_holds = reservations
                    .values()
                    .filter(|r| r.book_id == book_id && r.status == ReservationStatus::Ready)
                    .count() as i64;
                if active_loans + ready_holds >= total_copies as i64 {
                    return Err(CirculationRepositoryError::NoCopyAvailable(book_id));
                }
            }
        }

        let loan_id = self.loan_sequence.fetch_add(1, Ordering::Relaxed);
        loans.insert(
            loan_id,
            LoanRecord {
                loan_id,
                book_id,
                user_id,
                borrowed_at,
                due_at,
                returned_at: None,
                renewals: 0,
            },
        );
        Ok(loan_id)
    }

    async fn close_loan(
        &self,
        loan_id: LoanId,
        returned_at: i64,
        hold_deadline: i64,
    ) -> Result<ReturnOutcome, CirculationRepositoryError> {
        let mut loans = self.loans.write();
        let mut reservations = self.reservations.write();

        let loan = loans
            .get_mut(&loan_id)
            .ok_or(CirculationRepositoryError::LoanNotFound(loan_id))?;
        if loan.returned_at.is_some() {
            return Err(CirculationRepositoryError::LoanAlreadyReturned(loan_id));
        }
        loan.returned_at = Some(returned_at);
        let book_id = loan.book_id;

        let promoted = head_of_queue(&reservations, book_id)
            .map(|next_id| promote(&mut reservations, next_id, hold_deadline));

        Ok(ReturnOutcome { book_id, promoted })
    }

    async fn renew_loan(
        &self,
        loan_id: LoanId,
        extension_seconds: i64,
        max_renewals: i32,
    ) -> Result<i64, CirculationRepositoryError> {
        let mut loans = self.loans.write();
        let reservations = self.reservations.read();

        let loan = loans
            .get_mut(&loan_id)
            .ok_or(CirculationRepositoryError::LoanNotFound(loan_id))?;
        if loan.returned_at.is_some() {
            return Err(CirculationRepositoryError::LoanAlreadyReturned(loan_id));
        }
        if loan.renewals >= max_renewals {
            return Err(CirculationRepositoryError::RenewalLimitReached(loan_id));
        }
        if reservations
            .values()
            .any(|r| r.book_id == loan.book_id && r.is_active())
        {
            return Err(CirculationRepositoryError::BookWantedByQueue(loan.book_id));
        }

        loan.due_at += extension_seconds;
        loan.renewals += 1;
        Ok(loan.due_at)
    }

    async fn get_loan(&self, loan_id: LoanId) -> Result<LoanRecord, CirculationRepositoryError> {
        self.loans
            .read()
            .get(&loan_id)
            .cloned()
            .ok_or(CirculationRepositoryError::LoanNotFound(loan_id))
    }

    async fn list_active_loans(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let mut loans: Vec<LoanRecord> = self
            .loans
            .read()
            .values()
            .filter(|loan| loan.user_id == user_id && loan.returned_at.is_none())
            .cloned()
            .collect();
        loans.sort_by_key(|loan| loan.loan_id);
        Ok(loans)
    }

    async fn list_all_active_loans(&self) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let mut loans: Vec<LoanRecord> = self
            .loans
            .read()
            .values()
            .filter(|loan| loan.returned_at.is_none())
            .cloned()
            .collect();
        loans.sort_by_key(|loan| loan.loan_id);
        Ok(loans)
    }

    async fn list_loan_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<LoanRecord>, CirculationRepositoryError> {
        let mut loans: Vec<LoanRecord> = self
            .loans
            .read()
            .values()
            .filter(|loan| loan.user_id == user_id && loan.returned_at.is_some())
            .cloned()
            .collect();
        loans.sort_by_key(|loan| loan.loan_id);
        Ok(loans)
    }

    async fn count_active_loans(
        &self,
        user_id: UserId,
    ) -> Result<i64, CirculationRepositoryError> {
        Ok(self
            .loans
            .read()
            .values()
            .filter(|loan| loan.user_id == user_id && loan.returned_at.is_none())
            .count() as i64)
    }

    async fn book_usage(&self, book_id: BookId) -> Result<BookUsage, CirculationRepositoryError> {
        let active_loans = self
            .loans
            .read()
            .values()
            .filter(|loan| loan.book_id == book_id && loan.returned_at.is_none())
            .count() as i64;
        let ready_holds = self
            .reservations
            .read()
            .values()
            .filter(|r| r.book_id == book_id && r.status == ReservationStatus::Ready)
            .count() as i64;
        Ok(BookUsage {
            active_loans,
            ready_holds,
        })
    }

    async fn add_reservation(
        &self,
        user_id: UserId,
        book_id: BookId,
        reserved_at: i64,
    ) -> Result<(ReservationId, i64), CirculationRepositoryError> {
        let mut reservations = self.reservations.write();

        if reservations
            .values()
            .any(|r| r.book_id == book_id && r.user_id == user_id && r.is_active())
        {
            return Err(CirculationRepositoryError::AlreadyReserved(user_id, book_id));
        }

        // positions are a monotone per book sequence, never reused
        let position = reservations
            .values()
            .filter(|r| r.book_id == book_id)
            .map(|r| r.position)
            .max()
            .unwrap_or(0)
            + 1;

        let reservation_id = self.reservation_sequence.fetch_add(1, Ordering::Relaxed);
        reservations.insert(
            reservation_id,
            StoredReservation {
                book_id,
                user_id,
                position,
                status: ReservationStatus::Pending,
                reserved_at,
                ready_until: None,
            },
        );

        let rank = pending_rank(&reservations, book_id, position);
        Ok((reservation_id, rank))
    }

    async fn cancel_reservation(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        hold_deadline: i64,
    ) -> Result<Option<HoldNotice>, CirculationRepositoryError> {
        let mut reservations = self.reservations.write();

        let (previous_status, book_id) = {
            let reservation = reservations
                .get_mut(&reservation_id)
                .filter(|r| r.user_id == user_id && r.is_active())
                .ok_or(CirculationRepositoryError::ReservationNotFound(
                    reservation_id,
                ))?;
            let previous = (reservation.status, reservation.book_id);
            reservation.status = ReservationStatus::Cancelled;
            reservation.ready_until = None;
            previous
        };

        let promoted = if previous_status == ReservationStatus::Ready {
            head_of_queue(&reservations, book_id)
                .map(|next_id| promote(&mut reservations, next_id, hold_deadline))
        } else {
            None
        };

        Ok(promoted)
    }

    async fn list_reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError> {
        let reservations = self.reservations.read();
        let mut records: Vec<ReservationRecord> = reservations
            .iter()
            .filter(|(_, r)| r.user_id == user_id && r.is_active())
            .map(|(&res_id, r)| to_record(&reservations, res_id, r))
            .collect();
        records.sort_by_key(|record| record.reserved_at);
        Ok(records)
    }

    async fn list_queue_for_book(
        &self,
        book_id: BookId,
    ) -> Result<Vec<ReservationRecord>, CirculationRepositoryError> {
        let reservations = self.reservations.read();
        let mut records: Vec<ReservationRecord> = reservations
            .iter()
            .filter(|(_, r)| r.book_id == book_id && r.is_active())
            .map(|(&res_id, r)| to_record(&reservations, res_id, r))
            .collect();
        // ready holds first, then the pending queue in rank order
        records.sort_by_key(|record| {
            (
                record.status != ReservationStatus::Ready,
                record.queue_rank.unwrap_or(0),
            )
        });
        Ok(records)
    }

    async fn expire_ready_holds(
        &self,
        now: i64,
        hold_deadline: i64,
    ) -> Result<ExpirySweep, CirculationRepositoryError> {
        let mut reservations = self.reservations.write();

        let expired: Vec<(ReservationId, BookId)> = reservations
            .iter()
            .filter(|(_, r)| {
                r.status == ReservationStatus::Ready
                    && r.ready_until.map(|deadline| deadline < now).unwrap_or(false)
            })
            .map(|(&res_id, r)| (res_id, r.book_id))
            .collect();

        for (res_id, _) in &expired {
            let reservation = reservations.get_mut(res_id).expect("expired row exists");
            reservation.status = ReservationStatus::Expired;
            reservation.ready_until = None;
        }

        let mut promoted = Vec::new();
        for (_, book_id) in &expired {
            if let Some(next_id) = head_of_queue(&reservations, *book_id) {
                promoted.push(promote(&mut reservations, next_id, hold_deadline));
            }
        }

        Ok(ExpirySweep {
            expired: expired.len() as u64,
            promoted,
        })
    }
}
