use std::sync::Arc;

use actix_web::http::header::LOCATION;
use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use biblioservice_auth::AuthenticatedUser;
use paperclip::actix::{
    api_v2_operation,
    web::{self},
};

use biblioservice_catalog::api::BookId;
use biblioservice_catalog::client::CatalogClient;

use crate::api::{AddCommentRequest, CommentId, RatingSummary};
use crate::comments_repository::{CommentsRepository, CommentsRepositoryError, NewComment};
use crate::ratings_updater::RatingsProvider;

#[api_v2_operation]
pub async fn health() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().finish())
}

#[api_v2_operation]
pub async fn add_comment(
    comments_repository: Data<Arc<dyn CommentsRepository>>,
    catalog_client: Data<CatalogClient>,
    book_id: web::Path<BookId>,
    request: web::Json<AddCommentRequest>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let book_id = book_id.into_inner();
    let request = request.into_inner();

    if !(1..=5).contains(&request.rating) {
        return Ok(HttpResponse::BadRequest().json("Rating must be between 1 and 5"));
    }

    match catalog_client.get_book(book_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(HttpResponse::NotFound().finish()),
        Err(err) => {
            tracing::error!("Catalog lookup failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    }

    let comment = NewComment {
        book_id,
        user_id: auth.0.user_id,
        username: auth.0.username.clone(),
        rating: request.rating,
        body: request.body,
        posted_at: chrono::Utc::now().timestamp(),
    };

    Ok(match comments_repository.add_comment(comment).await {
        Ok(comment_id) => HttpResponse::Ok()
            .append_header((LOCATION, format!("/api/commentaire/{}", comment_id)))
            .finish(),
        Err(err) => {
            tracing::error!("Add comment failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_comments_for_book(
    comments_repository: Data<Arc<dyn CommentsRepository>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    Ok(
        match comments_repository.list_for_book(book_id.into_inner()).await {
            Ok(comments) => HttpResponse::Ok().json(comments),
            Err(err) => {
                tracing::error!("List comments failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn remove_comment(
    comments_repository: Data<Arc<dyn CommentsRepository>>,
    comment_id: web::Path<CommentId>,
    auth: AuthenticatedUser,
) -> Result<HttpResponse, Error> {
    let comment_id = comment_id.into_inner();

    let comment = match comments_repository.get_comment(comment_id).await {
        Ok(comment) => comment,
        Err(CommentsRepositoryError::CommentNotFound(_)) => {
            return Ok(HttpResponse::NotFound().finish())
        }
        Err(err) => {
            tracing::error!("Get comment failed {}", err);
            return Ok(HttpResponse::InternalServerError().finish());
        }
    };

    // only the author or an admin may drop a comment
    if !auth.0.allows_access_to(comment.user_id) {
        return Ok(HttpResponse::Forbidden().finish());
    }

    Ok(match comments_repository.remove_comment(comment_id).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => HttpResponse::NotFound().finish(),
        Err(err) => {
            tracing::error!("Remove comment failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_rating_for_book(
    comments_repository: Data<Arc<dyn CommentsRepository>>,
    book_id: web::Path<BookId>,
) -> Result<HttpResponse, Error> {
    let book_id = book_id.into_inner();
    Ok(match comments_repository.rating_summary(book_id).await {
        Ok(Some(summary)) => HttpResponse::Ok().json(summary),
        // a book nobody commented yet has an empty summary, not an error
        Ok(None) => HttpResponse::Ok().json(RatingSummary {
            book_id,
            average_rating: 0.0,
            comment_count: 0,
        }),
        Err(err) => {
            tracing::error!("Rating summary failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn get_ratings_board(
    provider: Data<RatingsProvider>,
) -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(provider.board_response()))
}
