use std::time::UNIX_EPOCH;

use biblioservice_catalog::api::{BookDetails, BookDetailsPatch};
use biblioservice_catalog::client::CatalogClient;
use biblioservice_circulation::api::{RegisterStudentRequest, ReservationStatus};
use biblioservice_circulation::client::CirculationClient;
use biblioservice_reviews::api::AddCommentRequest;
use biblioservice_reviews::client::ReviewsClient;

fn catalog_url() -> String {
    std::env::var("CATALOG_URL").unwrap_or("http://127.0.0.1:8001".to_string())
}

fn circulation_url() -> String {
    std::env::var("CIRCULATION_URL").unwrap_or("http://127.0.0.1:8002".to_string())
}

fn reviews_url() -> String {
    std::env::var("REVIEWS_URL").unwrap_or("http://127.0.0.1:8003".to_string())
}

fn unique_suffix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

async fn admin_token(circulation_client: &CirculationClient) -> String {
    let username = std::env::var("ADMIN_USERNAME").unwrap_or("admin".to_string());
    let password = std::env::var("ADMIN_PASSWORD").unwrap_or("admin".to_string());
    circulation_client
        .login(&username, &password)
        .await
        .expect("Failed to login as admin")
        .expect("Admin credentials rejected")
        .token
}

fn sample_book(title: &str, total_copies: i32) -> BookDetails {
    BookDetails {
        title: title.to_string(),
        authors: vec!["Victor Hugo".to_string()],
        publisher: "PUF".to_string(),
        description: "Description1".to_string(),
        isbn: "978-2-1234-5680-3".to_string(),
        tags: vec!["roman".to_string()],
        total_copies,
    }
}

async fn register_and_login(
    circulation_client: &CirculationClient,
    username: &str,
) -> (i32, String) {
    let user_id = circulation_client
        .register_student(RegisterStudentRequest {
            username: username.to_string(),
            email: format!("{}@univ.example", username),
            password: "motdepasse".to_string(),
        })
        .await
        .expect("Failed to register student");

    let login = circulation_client
        .login(username, "motdepasse")
        .await
        .expect("Failed to login")
        .expect("Credentials rejected");
    assert_eq!(login.user_id, user_id);
    (user_id, login.token)
}

#[tokio::test]
/// Simple test for the catalog service
/// Logs in as admin
/// Creates a book
/// Gets the book
/// Patches the number of copies
/// Searches the catalog and checks the book is there
async fn catalog_e2e_test() {
    let circulation_client =
        CirculationClient::new(&circulation_url()).expect("Failed to create circulation client");
    let token = admin_token(&circulation_client).await;
    let catalog_client = CatalogClient::new(&catalog_url())
        .expect("Failed to create catalog client")
        .with_token(&token);

    let title = format!("Les Misérables {}", unique_suffix());
    let book_details = sample_book(&title, 3);

    let book_id = catalog_client
        .add_book(book_details.clone())
        .await
        .expect("Failed to add book");

    let returned_book_details = catalog_client
        .get_book(book_id)
        .await
        .expect("Failed to get book")
        .expect("Book not found");
    assert_eq!(returned_book_details, book_details);

    let book_patch = BookDetailsPatch {
        total_copies: Some(5),
        ..BookDetailsPatch::default()
    };
    catalog_client
        .update_book(book_id, book_patch)
        .await
        .expect("Failed to patch book");

    let patched_book_details = catalog_client
        .get_book(book_id)
        .await
        .expect("Failed to get book")
        .expect("Book not found");
    assert_eq!(patched_book_details.total_copies, 5);

    let summaries = catalog_client
        .list_books(Some(&title))
        .await
        .expect("Failed to search books");
    assert!(summaries
        .iter()
        .any(|summary| summary.book_id == book_id && summary.total_copies == 5));
}

#[tokio::test]
/// Simple test for the whole circulation workflow
/// Admin creates a book with a single copy
/// Student A registers, logs in and borrows it
/// Student B queues a reservation at rank 1
/// A's renewal is refused while B waits
/// A returns the book, B's reservation becomes ready
/// B converts the hold into a loan and returns it
/// Loan history and reservation lists reflect all of it
async fn circulation_e2e_test() {
    let suffix = unique_suffix();
    let plain_circulation_client =
        CirculationClient::new(&circulation_url()).expect("Failed to create circulation client");
    let token = admin_token(&plain_circulation_client).await;
    let catalog_client = CatalogClient::new(&catalog_url())
        .expect("Failed to create catalog client")
        .with_token(&token);

    let book_id = catalog_client
        .add_book(sample_book(&format!("Candide {}", suffix), 1))
        .await
        .expect("Failed to add book");

    // STUDENT A BORROWS
    let (user_a, token_a) = register_and_login(
        &plain_circulation_client,
        &format!("etudiant_a_{}", suffix),
    )
    .await;
    let client_a = CirculationClient::new(&circulation_url())
        .expect("Failed to create client")
        .with_token(&token_a);

    let loan_id = client_a
        .borrow_book(user_a, book_id)
        .await
        .expect("Failed to borrow book")
        .expect("Borrow refused");

    let active_loans = client_a
        .list_active_loans(user_a)
        .await
        .expect("Failed to list loans");
    assert_eq!(active_loans.len(), 1);
    assert_eq!(active_loans[0].loan_id, loan_id);
    assert!(!active_loans[0].overdue);

    // BORROWING THE SAME BOOK AGAIN IS REFUSED
    let again = client_a
        .borrow_book(user_a, book_id)
        .await
        .expect("Failed to call borrow");
    assert_eq!(again, None);

    // STUDENT B QUEUES UP
    let (user_b, token_b) = register_and_login(
        &plain_circulation_client,
        &format!("etudiant_b_{}", suffix),
    )
    .await;
    let client_b = CirculationClient::new(&circulation_url())
        .expect("Failed to create client")
        .with_token(&token_b);

    // no copy is free, borrowing is refused but reserving works
    let refused = client_b
        .borrow_book(user_b, book_id)
        .await
        .expect("Failed to call borrow");
    assert_eq!(refused, None);

    let reservation = client_b
        .reserve_book(user_b, book_id)
        .await
        .expect("Failed to reserve book")
        .expect("Reservation refused");
    assert_eq!(reservation.queue_rank, 1);

    // RENEWAL REFUSED WHILE THE QUEUE IS NON EMPTY
    let renewal = client_a
        .renew_loan(loan_id)
        .await
        .expect("Failed to call renew");
    assert_eq!(renewal, None);

    // A RETURNS, B IS PROMOTED
    let returned = client_a
        .return_book(loan_id)
        .await
        .expect("Failed to return book");
    assert!(returned);

    let reservations_b = client_b
        .list_reservations(user_b)
        .await
        .expect("Failed to list reservations");
    assert_eq!(reservations_b.len(), 1);
    assert_eq!(reservations_b[0].status, ReservationStatus::Ready);
    assert!(reservations_b[0].ready_until.is_some());

    // RETURNING TWICE IS REFUSED
    let returned_twice = client_a
        .return_book(loan_id)
        .await
        .expect("Failed to call return");
    assert!(!returned_twice);

    // B CONVERTS THE HOLD INTO A LOAN
    let loan_b = client_b
        .borrow_book(user_b, book_id)
        .await
        .expect("Failed to borrow book")
        .expect("Borrow refused despite ready hold");

    let reservations_b = client_b
        .list_reservations(user_b)
        .await
        .expect("Failed to list reservations");
    assert_eq!(reservations_b, vec![]);

    let returned = client_b
        .return_book(loan_b)
        .await
        .expect("Failed to return book");
    assert!(returned);

    // HISTORY
    let history_a = client_a
        .loan_history(user_a)
        .await
        .expect("Failed to get history");
    assert!(history_a
        .iter()
        .any(|loan| loan.loan_id == loan_id && loan.returned_at.is_some()));
}

#[tokio::test]
/// Simple test for the reviews service
/// Admin creates a book
/// A student registers, logs in and comments it
/// Reads the comments and the rating summary back
/// and finally removes the comment
async fn reviews_e2e_test() {
    let suffix = unique_suffix();
    let plain_circulation_client =
        CirculationClient::new(&circulation_url()).expect("Failed to create circulation client");
    let token = admin_token(&plain_circulation_client).await;
    let catalog_client = CatalogClient::new(&catalog_url())
        .expect("Failed to create catalog client")
        .with_token(&token);

    let book_id = catalog_client
        .add_book(sample_book(&format!("Germinal {}", suffix), 2))
        .await
        .expect("Failed to add book");

    let (user_id, student_token) = register_and_login(
        &plain_circulation_client,
        &format!("lecteur_{}", suffix),
    )
    .await;
    let reviews_client = ReviewsClient::new(&reviews_url())
        .expect("Failed to create reviews client")
        .with_token(&student_token);

    let comment_id = reviews_client
        .add_comment(
            book_id,
            AddCommentRequest {
                rating: 4,
                body: "Très bon livre".to_string(),
            },
        )
        .await
        .expect("Failed to add comment");

    let comments = reviews_client
        .list_comments(book_id)
        .await
        .expect("Failed to list comments");
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].comment_id, comment_id);
    assert_eq!(comments[0].user_id, user_id);
    assert_eq!(comments[0].rating, 4);

    let rating = reviews_client
        .rating_for_book(book_id)
        .await
        .expect("Failed to get rating");
    assert_eq!(rating.comment_count, 1);
    assert!((rating.average_rating - 4.0).abs() < 1e-9);

    let removed = reviews_client
        .remove_comment(comment_id)
        .await
        .expect("Failed to remove comment");
    assert!(removed);

    let rating = reviews_client
        .rating_for_book(book_id)
        .await
        .expect("Failed to get rating");
    assert_eq!(rating.comment_count, 0);
}
