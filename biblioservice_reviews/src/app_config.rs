use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(
                    web::resource("/palmares").route(web::get().to(handlers::get_ratings_board)),
                )
                .service(
                    web::resource("/commentaire/{comment_id}")
                        .route(web::delete().to(handlers::remove_comment)),
                )
                .service(
                    web::scope("/livre/{book_id}")
                        .service(
                            web::resource("/commentaire")
                                .route(web::post().to(handlers::add_comment)),
                        )
                        .service(
                            web::resource("/commentaires")
                                .route(web::get().to(handlers::get_comments_for_book)),
                        )
                        .service(
                            web::resource("/note")
                                .route(web::get().to(handlers::get_rating_for_book)),
                        ),
                ),
        );
}
