use paperclip::actix::web;

use crate::handlers;

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(web::resource("/connexion").route(web::post().to(handlers::login)))
                .service(
                    web::resource("/etudiants").route(web::get().to(handlers::get_all_students)),
                )
                .service(
                    web::resource("/emprunts")
                        .route(web::get().to(handlers::get_all_active_loans)),
                )
                .service(
                    web::scope("/emprunt/{loan_id}")
                        .service(
                            web::resource("/retour").route(web::post().to(handlers::return_book)),
                        )
                        .service(
                            web::resource("/renouvellement")
                                .route(web::post().to(handlers::renew_loan)),
                        ),
                )
                .service(
                    web::resource("/livre/{book_id}/reservations")
                        .route(web::get().to(handlers::get_queue_for_book)),
                )
                .service(
                    web::scope("/etudiant")
                        .service(
                            web::resource("").route(web::post().to(handlers::register_student)),
                        )
                        .service(
                            web::scope("/{user_id}")
                                .service(
                                    web::resource("")
                                        .route(web::get().to(handlers::get_student))
                                        .route(web::delete().to(handlers::remove_student)),
                                )
                                .service(
                                    web::resource("/emprunts")
                                        .route(web::get().to(handlers::get_active_loans)),
                                )
                                .service(
                                    web::resource("/historique")
                                        .route(web::get().to(handlers::get_loan_history)),
                                )
                                .service(
                                    web::resource("/reservations")
                                        .route(web::get().to(handlers::get_reservations)),
                                )
                                .service(
                                    web::resource("/emprunt/{book_id}")
                                        .route(web::post().to(handlers::borrow_book)),
                                )
                                .service(
                                    web::resource("/reservation/{target_id}")
                                        .route(web::post().to(handlers::reserve_book))
                                        .route(web::delete().to(handlers::cancel_reservation)),
                                ),
                        ),
                ),
        );
}
