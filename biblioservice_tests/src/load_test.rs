use std::collections::HashMap;
use std::time::UNIX_EPOCH;

use rand::prelude::SliceRandom;
use rand::{thread_rng, Rng};

use biblioservice_catalog::api::BookDetails;
use biblioservice_catalog::client::CatalogClient;
use biblioservice_circulation::api::RegisterStudentRequest;
use biblioservice_circulation::client::CirculationClient;

#[tokio::test]
async fn generate_lots_of_books_and_student_loans() {
    const NO_OF_BOOKS_TO_GENERATE: usize = 10;
    const NO_OF_AUTHORS_TO_GENERATE: usize = 100;
    const NO_OF_STUDENTS_TO_GENERATE: usize = 10;
    const NO_OF_LOAN_ACTIONS: usize = 100;

    let mut rng = thread_rng();
    let catalog_url = std::env::var("CATALOG_URL").unwrap_or("http://127.0.0.1:8001".to_string());
    let circulation_url =
        std::env::var("CIRCULATION_URL").unwrap_or("http://127.0.0.1:8002".to_string());

    let circulation_client =
        CirculationClient::new(&circulation_url).expect("Failed to create circulation client");
    let admin_username = std::env::var("ADMIN_USERNAME").unwrap_or("admin".to_string());
    let admin_password = std::env::var("ADMIN_PASSWORD").unwrap_or("admin".to_string());
    let admin_token = circulation_client
        .login(&admin_username, &admin_password)
        .await
        .expect("Failed to login as admin")
        .expect("Admin credentials rejected")
        .token;
    let catalog_client = CatalogClient::new(&catalog_url)
        .expect("Failed to create catalog client")
        .with_token(&admin_token);

    let authors = generate_authors(&mut rng, NO_OF_AUTHORS_TO_GENERATE);
    let books = generate_books(&mut rng, NO_OF_BOOKS_TO_GENERATE, &authors);
    let students = generate_students(&mut rng, NO_OF_STUDENTS_TO_GENERATE);

    let mut book_ids = vec![];
    for book in books {
        let book_id = catalog_client
            .add_book(book)
            .await
            .expect("Failed to add book");
        book_ids.push(book_id);

        println!("Added book {}", book_id);
    }

    let mut student_clients = HashMap::new();
    let mut user_ids = vec![];
    for student in students {
        let username = student.username.clone();
        let password = student.password.clone();
        let user_id = circulation_client
            .register_student(student)
            .await
            .expect("Failed to register student");
        let token = circulation_client
            .login(&username, &password)
            .await
            .expect("Failed to login")
            .expect("Credentials rejected")
            .token;
        student_clients.insert(
            user_id,
            CirculationClient::new(&circulation_url)
                .expect("Failed to create client")
                .with_token(&token),
        );
        user_ids.push(user_id);
        println!("Registered student {}", user_id);
    }

    // random walk of borrows and returns; a refused borrow is fine, the
    // copy is simply out or the student hit a limit
    let mut open_loans: HashMap<(i32, i32), i32> = HashMap::default();

    for _ in 0..NO_OF_LOAN_ACTIONS {
        let book_id = *book_ids.choose(&mut rng).unwrap();
        let user_id = *user_ids.choose(&mut rng).unwrap();
        let client = &student_clients[&user_id];

        if let Some(loan_id) = open_loans.remove(&(user_id, book_id)) {
            let returned = client
                .return_book(loan_id)
                .await
                .expect("Failed to return book");
            assert!(returned, "Failed to return book - result false");
            println!("Returned loan {} of student {}", loan_id, user_id);
            continue;
        }

        match client
            .borrow_book(user_id, book_id)
            .await
            .expect("Failed to call borrow")
        {
            Some(loan_id) => {
                open_loans.insert((user_id, book_id), loan_id);
                println!("Borrowed book {} for student {}", book_id, user_id);
            }
            None => {
                println!("Borrow of book {} refused for student {}", book_id, user_id);
            }
        }
    }
}

fn generate_authors(rng: &mut impl Rng, no_of_authors: usize) -> Vec<String> {
    (0..no_of_authors)
        .map(|_| {
            format!(
                "{} {}",
                FIRST_NAMES.choose(rng).unwrap(),
                LAST_NAMES.choose(rng).unwrap()
            )
        })
        .collect()
}

fn generate_books(
    rng: &mut impl Rng,
    no_of_books_to_generate: usize,
    authors: &[String],
) -> Vec<BookDetails> {
    (0..no_of_books_to_generate)
        .map(|no| BookDetails {
            title: format!("A tale of number {} and {}", no, rng.gen_range(0..1000)),
            authors: (0..rng.gen_range(1..3))
                .map(|_| authors.choose(rng).unwrap())
                .cloned()
                .collect(),
            publisher: format!("Publisher {}", no % 20),
            description: "Some long description that is long".to_string(),
            isbn: format!("978-2-{:04}-{:04}-3", no, rng.gen_range(0..10000)),
            tags: vec![],
            total_copies: rng.gen_range(1..4),
        })
        .collect()
}

fn generate_students(
    rng: &mut impl Rng,
    no_of_students_to_generate: usize,
) -> Vec<RegisterStudentRequest> {
    let suffix = std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    (0..no_of_students_to_generate)
        .map(|no| {
            let username = format!(
                "{}_{}_{}_{}",
                FIRST_NAMES.choose(rng).unwrap().to_lowercase(),
                suffix,
                no,
                rng.gen_range(0..1000)
            );
            RegisterStudentRequest {
                email: format!("{}@univ.example", username),
                username,
                password: "motdepasse".to_string(),
            }
        })
        .collect()
}

const FIRST_NAMES: [&str; 20] = [
    "Amelie", "Bernard", "Camille", "Denis", "Elise", "Fabien", "Gabrielle", "Hugo", "Ines",
    "Julien", "Karine", "Louis", "Manon", "Nicolas", "Oceane", "Pierre", "Quentin", "Renee",
    "Sophie", "Thomas",
];

const LAST_NAMES: [&str; 20] = [
    "Martin", "Bernard", "Thomas", "Petit", "Robert", "Richard", "Durand", "Dubois", "Moreau",
    "Laurent", "Simon", "Michel", "Lefebvre", "Leroy", "Roux", "David", "Bertrand", "Morel",
    "Fournier", "Girard",
];
