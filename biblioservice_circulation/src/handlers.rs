use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use biblioservice_auth::{
    issue_token, AdminAccess, AuthenticatedUser, TokenConfig, ROLE_STUDENT,
};
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use crate::api::{
    ActiveLoan, BookId, LoanId, LoginRequest, LoginResponse, RegisterStudentRequest,
    RenewalResponse, ReservationId, ReserveResponse, UserId,
};
use crate::book_availability_checker::BookAvailabilityChecker;
use crate::circulation_repository::{
    CirculationRepository, CirculationRepositoryError, StudentRecord,
};
use crate::policy::{now_epoch_seconds, CirculationPolicy};

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn register_student(
    repository: Data<Arc<dyn CirculationRepository>>,
    request: web::Json<RegisterStudentRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();

    let password_hash = match bcrypt::hash(&request.password, bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            tracing::error!("Password hashing failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    let record = StudentRecord {
        username: request.username,
        email: request.email,
        password_hash,
        role: ROLE_STUDENT.to_string(),
    };

    Ok(match repository.add_student(record).await {
        Ok(user_id) => HttpResponse::Ok()
            .append_header((LOCATION, format!("/api/etudiant/{}", user_id)))
            .finish(),
        Err(CirculationRepositoryError::UsernameTaken(username)) => {
            HttpResponse::Conflict().json(format!("Username {} already taken", username))
        }
        Err(err) => {
            tracing::error!("Register student failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn login(
    repository: Data<Arc<dyn CirculationRepository>>,
    token_config: Data<TokenConfig>,
    request: web::Json<LoginRequest>,
) -> Result<HttpResponse, Error> {
    let request = request.into_inner();

    let student = match repository
        .get_student_by_username(request.username.clone())
        .await
    {
        Ok(student) => student,
        Err(err) => {
            tracing::error!("Login lookup failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    let (user_id, record) = match student {
        Some(found) => found,
        None => return Ok(HttpResponse::Unauthorized().json("Invalid credentials")),
    };

    let password_matches =
        bcrypt::verify(&request.password, &record.password_hash).unwrap_or_default();
    if !password_matches {
        return Ok(HttpResponse::Unauthorized().json("Invalid credentials"));
    }

    Ok(
        match issue_token(user_id, &record.username, &record.role, &token_config) {
            Ok(token) => HttpResponse::Ok().json(LoginResponse {
                token,
                user_id,
                role: record.role,
            }),
            Err(err) => {
                tracing::error!("Token issue failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn get_all_students(
    repository: Data<Arc<dyn CirculationRepository>>,
    _admin: AdminAccess,
) -> Result<HttpResponse, Error> {
    Ok(match repository.get_all_student_ids().await {
        Ok(ids) => HttpResponse::Ok().json(ids),
        Err(err) => {
            tracing::error!("Get all students failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_student(
    repository: Data<Arc<dyn CirculationRepository>>,
    user_id: web::Path<UserId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    Ok(match repository.get_student(user_id).await {
        Ok(details) => HttpResponse::Ok().json(details),
        Err(CirculationRepositoryError::StudentNotFound(_)) => HttpResponse::NotFound().finish(),
        Err(err) => {
            tracing::error!("Get student failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn remove_student(
    repository: Data<Arc<dyn CirculationRepository>>,
    policy: Data<CirculationPolicy>,
    user_id: web::Path<UserId>,
    _admin: AdminAccess,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    let hold_deadline = policy.hold_deadline(now_epoch_seconds());

    Ok(match repository.remove_student(user_id, hold_deadline).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(CirculationRepositoryError::StudentNotFound(_)) => HttpResponse::NotFound().finish(),
        Err(CirculationRepositoryError::StudentHasActiveLoans(_)) => {
            HttpResponse::Conflict().json("Student still has active loans")
        }
        Err(err) => {
            tracing::error!("Remove student failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn borrow_book(
    repository: Data<Arc<dyn CirculationRepository>>,
    checker: Data<BookAvailabilityChecker>,
    policy: Data<CirculationPolicy>,
    path: web::Path<(UserId, BookId)>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let (user_id, book_id) = path.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    match repository.count_active_loans(user_id).await {
        Ok(count) if count >= policy.max_active_loans => {
            return Ok(HttpResponse::Forbidden().json("Loan limit reached"));
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!("Loan count failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    }

    let total_copies = match checker.fetch_total_copies(book_id).await {
        Ok(Some(total_copies)) => total_copies,
        Ok(None) => return Ok(HttpResponse::NotFound().finish()),
        Err(err) => {
            tracing::error!("Availability check failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    let now = now_epoch_seconds();
    Ok(
        match repository
            .open_loan(user_id, book_id, now, policy.due_at(now), total_copies)
            .await
        {
            Ok(loan_id) => HttpResponse::Ok()
                .append_header((LOCATION, format!("/api/emprunt/{}", loan_id)))
                .finish(),
            Err(CirculationRepositoryError::LoanAlreadyOpen(..)) => {
                HttpResponse::Forbidden().json("Book already borrowed by this student")
            }
            Err(CirculationRepositoryError::NoCopyAvailable(..)) => {
                HttpResponse::Forbidden().json("No copy available, place a reservation")
            }
            Err(err) => {
                tracing::error!("Borrow book failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn return_book(
    repository: Data<Arc<dyn CirculationRepository>>,
    policy: Data<CirculationPolicy>,
    loan_id: web::Path<LoanId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let loan_id = loan_id.into_inner();

    let loan = match repository.get_loan(loan_id).await {
        Ok(loan) => loan,
        Err(CirculationRepositoryError::LoanNotFound(_)) => {
            return Ok(HttpResponse::NotFound().finish())
        }
        Err(err) => {
            tracing::error!("Get loan failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };
    if !auth.0.allows_access_to(loan.user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    let now = now_epoch_seconds();
    Ok(
        match repository
            .close_loan(loan_id, now, policy.hold_deadline(now))
            .await
        {
            Ok(outcome) => {
                if let Some(notice) = outcome.promoted {
                    tracing::info!(
                        "Book {} returned, reservation {} of user {} is ready for pickup",
                        outcome.book_id,
                        notice.reservation_id,
                        notice.user_id
                    );
                }
                HttpResponse::Ok().finish()
            }
            Err(CirculationRepositoryError::LoanNotFound(_)) => HttpResponse::NotFound().finish(),
            Err(CirculationRepositoryError::LoanAlreadyReturned(_)) => {
                HttpResponse::Conflict().json("Loan already returned")
            }
            Err(err) => {
                tracing::error!("Return book failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn renew_loan(
    repository: Data<Arc<dyn CirculationRepository>>,
    policy: Data<CirculationPolicy>,
    loan_id: web::Path<LoanId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let loan_id = loan_id.into_inner();

    let loan = match repository.get_loan(loan_id).await {
        Ok(loan) => loan,
        Err(CirculationRepositoryError::LoanNotFound(_)) => {
            return Ok(HttpResponse::NotFound().finish())
        }
        Err(err) => {
            tracing::error!("Get loan failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };
    if !auth.0.allows_access_to(loan.user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    Ok(
        match repository
            .renew_loan(
                loan_id,
                policy.renewal_extension_seconds(),
                policy.max_renewals,
            )
            .await
        {
            Ok(due_at) => HttpResponse::Ok().json(RenewalResponse { due_at }),
            Err(CirculationRepositoryError::LoanNotFound(_)) => HttpResponse::NotFound().finish(),
            Err(CirculationRepositoryError::LoanAlreadyReturned(_)) => {
                HttpResponse::Conflict().json("Loan already returned")
            }
            Err(CirculationRepositoryError::RenewalLimitReached(_)) => {
                HttpResponse::Conflict().json("Renewal limit reached")
            }
            Err(CirculationRepositoryError::BookWantedByQueue(_)) => {
                HttpResponse::Conflict().json("Book is wanted by queued reservations")
            }
            Err(err) => {
                tracing::error!("Renew loan failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn get_active_loans(
    repository: Data<Arc<dyn CirculationRepository>>,
    user_id: web::Path<UserId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    let now = now_epoch_seconds();
    Ok(match repository.list_active_loans(user_id).await {
        Ok(loans) => HttpResponse::Ok().json(
            loans
                .into_iter()
                .map(|record| ActiveLoan::from_record(record, now))
                .collect::<Vec<_>>(),
        ),
        Err(err) => {
            tracing::error!("List active loans failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_loan_history(
    repository: Data<Arc<dyn CirculationRepository>>,
    user_id: web::Path<UserId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    Ok(match repository.list_loan_history(user_id).await {
        Ok(loans) => HttpResponse::Ok().json(loans),
        Err(err) => {
            tracing::error!("Loan history failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_all_active_loans(
    repository: Data<Arc<dyn CirculationRepository>>,
    _admin: AdminAccess,
) -> Result<HttpResponse, Error> {
    let now = now_epoch_seconds();
    Ok(match repository.list_all_active_loans().await {
        Ok(loans) => HttpResponse::Ok().json(
            loans
                .into_iter()
                .map(|record| ActiveLoan::from_record(record, now))
                .collect::<Vec<_>>(),
        ),
        Err(err) => {
            tracing::error!("List all loans failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn reserve_book(
    repository: Data<Arc<dyn CirculationRepository>>,
    checker: Data<BookAvailabilityChecker>,
    path: web::Path<(UserId, BookId)>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let (user_id, book_id) = path.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    let total_copies = match checker.fetch_total_copies(book_id).await {
        Ok(Some(total_copies)) => total_copies,
        Ok(None) => return Ok(HttpResponse::NotFound().finish()),
        Err(err) => {
            tracing::error!("Availability check failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    // reservations are only for books with no free copy
    match repository.book_usage(book_id).await {
        Ok(usage) if usage.active_loans + usage.ready_holds < total_copies as i64 => {
            return Ok(HttpResponse::Forbidden().json("A copy is available, borrow it directly"));
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!("Book usage failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    }

    Ok(
        match repository
            .add_reservation(user_id, book_id, now_epoch_seconds())
            .await
        {
            Ok((reservation_id, queue_rank)) => HttpResponse::Ok().json(ReserveResponse {
                reservation_id,
                queue_rank,
            }),
            Err(CirculationRepositoryError::AlreadyReserved(..)) => {
                HttpResponse::Conflict().json("Student already has a reservation for this book")
            }
            Err(err) => {
                tracing::error!("Reserve book failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn cancel_reservation(
    repository: Data<Arc<dyn CirculationRepository>>,
    policy: Data<CirculationPolicy>,
    path: web::Path<(UserId, ReservationId)>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let (user_id, reservation_id) = path.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    let hold_deadline = policy.hold_deadline(now_epoch_seconds());
    Ok(
        match repository
            .cancel_reservation(user_id, reservation_id, hold_deadline)
            .await
        {
            Ok(promoted) => {
                if let Some(notice) = promoted {
                    tracing::info!(
                        "Hold cancelled, reservation {} of user {} for book {} is ready",
                        notice.reservation_id,
                        notice.user_id,
                        notice.book_id
                    );
                }
                HttpResponse::Ok().finish()
            }
            Err(CirculationRepositoryError::ReservationNotFound(_)) => {
                HttpResponse::NotFound().finish()
            }
            Err(err) => {
                tracing::error!("Cancel reservation failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn get_reservations(
    repository: Data<Arc<dyn CirculationRepository>>,
    user_id: web::Path<UserId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let user_id = user_id.into_inner();
    if !auth.0.allows_access_to(user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    Ok(match repository.list_reservations_for_user(user_id).await {
        Ok(reservations) => HttpResponse::Ok().json(reservations),
        Err(err) => {
            tracing::error!("List reservations failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_queue_for_book(
    repository: Data<Arc<dyn CirculationRepository>>,
    book_id: web::Path<BookId>,
    _admin: AdminAccess,
) -> Result<HttpResponse, Error> {
    Ok(
        match repository.list_queue_for_book(book_id.into_inner()).await {
            Ok(queue) => HttpResponse::Ok().json(queue),
            Err(err) => {
                tracing::error!("List queue failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}
