use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::json;

use crate::api;
use crate::api::{BookDetails, BookId, BookSummary};
use crate::books_repository::{BookRepository, BookRepositoryError};

pub struct InMemoryBookRepository {
    book_sequence_generator: AtomicI32,
    books: parking_lot::RwLock<HashMap<BookId, BookDetails>>,
}

impl Default for InMemoryBookRepository {
    fn default() -> Self {
        Self {
            book_sequence_generator: AtomicI32::new(1),
            books: Default::default(),
        }
    }
}

fn matches_filter(details: &BookDetails, filter: &str) -> bool {
    let filter = filter.to_lowercase();
    details.title.to_lowercase().contains(&filter)
        || details
            .authors
            .iter()
            .any(|author| author.to_lowercase().contains(&filter))
}

#[async_trait::async_trait]
impl BookRepository for InMemoryBookRepository {
    async fn add_book(&self, details: api::BookDetails) -> Result<BookId, BookRepositoryError> {
        let id = self.book_sequence_generator.fetch_add(1, Ordering::Relaxed);
        self.books.write().insert(id, details);
        Ok(id)
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: api::BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError> {
        let mut locked_books = self.books.write();
        if let Some(book) = locked_books.get_mut(&book_id) {
            let mut result_book = json!(book);
            json_patch::merge(&mut result_book, &json!(patch));
            let result_book: BookDetails = serde_json::from_value(result_book)?;
            *book = result_book;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_book(&self, book_id: BookId) -> Result<BookDetails, BookRepositoryError> {
        self.books
            .read()
            .get(&book_id)
            .cloned()
            .ok_or(BookRepositoryError::NotFound(book_id))
    }

    async fn remove_book(&self, book_id: BookId) -> Result<bool, BookRepositoryError> {
        Ok(self.books.write().remove(&book_id).is_some())
    }

    async fn list_books(
        &self,
        filter: Option<String>,
    ) -> Result<Vec<BookSummary>, BookRepositoryError> {
        Ok(self
            .books
            .read()
            .iter()
            .filter(|(_, details)| {
                filter
                    .as_deref()
                    .map(|f| matches_filter(details, f))
                    .unwrap_or(true)
            })
            .map(|(&book_id, details)| BookSummary {
                book_id,
                title: details.title.clone(),
                authors: details.authors.clone(),
                total_copies: details.total_copies,
            })
            .collect())
    }
}

#[cfg(test)]
mod in_memory_book_repository_tests {
    use crate::api::{BookDetails, BookDetailsPatch, BookSummary};
    use crate::books_repository::{BookRepository, BookRepositoryError, InMemoryBookRepository};

    fn sample_book(title: &str, author: &str) -> BookDetails {
        BookDetails {
            title: title.to_string(),
            authors: vec![author.to_string()],
            publisher: "PUF".to_string(),
            description: "".to_string(),
            isbn: "978-2-1234-5680-3".to_string(),
            tags: vec!["roman".to_string()],
            total_copies: 2,
        }
    }

    #[tokio::test]
    /// Tests if add_book and get_book work correctly
    /// for the sake of not starting container multiple times it tests everything in one testcase
    async fn test_add_book_and_get_it() {
        let repo = InMemoryBookRepository::default();

        let not_existing_book_id = 20000;
        let book_not_found = repo.get_book(not_existing_book_id).await;
        assert!(matches!(
            book_not_found,
            Err(BookRepositoryError::NotFound(..))
        ));

        let book_details = sample_book("Les Misérables", "Victor Hugo");
        let id = repo
            .add_book(book_details.clone())
            .await
            .expect("Failed to add book");

        let details = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(details, book_details);
    }

    #[tokio::test]
    /// Tests list_books with and without a filter
    /// 1. Lists empty catalog
    /// 2. Adds two books
    /// 3. Lists everything
    /// 4. Filters by title substring
    /// 5. Filters by author substring, case insensitive
    /// 6. Filters with no match
    async fn test_add_books_and_list_them() {
        let repo = InMemoryBookRepository::default();

        let list = repo.list_books(None).await.expect("Failed to list books");
        assert_eq!(list, vec![]);

        let book1 = sample_book("Les Misérables", "Victor Hugo");
        let book2 = sample_book("Madame Bovary", "Gustave Flaubert");

        let id_1 = repo
            .add_book(book1.clone())
            .await
            .expect("Failed to add book");
        let id_2 = repo
            .add_book(book2.clone())
            .await
            .expect("Failed to add book");

        let mut list = repo.list_books(None).await.expect("Failed to list books");
        list.sort_by_key(|summary| summary.book_id);

        assert_eq!(
            list,
            vec![
                BookSummary {
                    book_id: id_1,
                    title: book1.title.clone(),
                    authors: book1.authors.clone(),
                    total_copies: 2,
                },
                BookSummary {
                    book_id: id_2,
                    title: book2.title.clone(),
                    authors: book2.authors.clone(),
                    total_copies: 2,
                }
            ]
        );

        let by_title = repo
            .list_books(Some("bovary".to_string()))
            .await
            .expect("Failed to search");
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].book_id, id_2);

        let by_author = repo
            .list_books(Some("HUGO".to_string()))
            .await
            .expect("Failed to search");
        assert_eq!(by_author.len(), 1);
        assert_eq!(by_author[0].book_id, id_1);

        let no_match = repo
            .list_books(Some("zola".to_string()))
            .await
            .expect("Failed to search");
        assert_eq!(no_match, vec![]);
    }

    #[tokio::test]
    /// Tests patching a book, then removing it
    async fn test_patch_and_remove_book() {
        let repo = InMemoryBookRepository::default();
        let not_existing_book = 2000;
        let result = repo
            .update_book(not_existing_book, BookDetailsPatch::default())
            .await
            .expect("Failed to update");
        // false means nothing to update
        assert!(!result);

        let book_details = sample_book("Les Misérables", "Victor Hugo");
        let id = repo
            .add_book(book_details.clone())
            .await
            .expect("Failed to add book");

        let patch_copies_only = BookDetailsPatch {
            total_copies: Some(5),
            ..BookDetailsPatch::default()
        };
        let patch_result = repo
            .update_book(id, patch_copies_only)
            .await
            .expect("Failed to patch");
        assert!(patch_result);

        let expected_with_patched_copies = BookDetails {
            total_copies: 5,
            ..book_details.clone()
        };
        assert_eq!(
            repo.get_book(id).await.unwrap(),
            expected_with_patched_copies
        );

        let removed = repo.remove_book(id).await.expect("Failed to remove");
        assert!(removed);

        let removed_again = repo.remove_book(id).await.expect("Failed to remove");
        assert!(!removed_again);

        let get_after_remove = repo.get_book(id).await;
        assert!(matches!(
            get_after_remove,
            Err(BookRepositoryError::NotFound(..))
        ));
    }
}
