use anyhow::{bail, Context};
use reqwest::header::{AUTHORIZATION, LOCATION};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    ActiveLoan, BookId, LoanId, LoanRecord, LoginRequest, LoginResponse, RegisterStudentRequest,
    RenewalResponse, ReservationId, ReservationRecord, ReserveResponse, StudentDetails, UserId,
};

pub struct CirculationClient {
    url: String,
    client: ClientWithMiddleware,
    token: Option<String>,
}

impl CirculationClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
            token: None,
        })
    }

    /// Returns a client that attaches the given bearer token to every call
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Calls POST /api/etudiant endpoint
    /// Returns user_id of the registered student from the location header
    pub async fn register_student(
        &self,
        request: RegisterStudentRequest,
    ) -> anyhow::Result<UserId> {
        let response = self
            .client
            .post(format!("{}/api/etudiant", self.url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to register student {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/etudiant/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse user id")
    }

    /// Calls POST /api/connexion endpoint
    /// Returns the token and identity on success, None on bad credentials
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Option<LoginResponse>> {
        let response = self
            .client
            .post(format!("{}/api/connexion", self.url))
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to login {}", error)
        }
    }

    /// Calls GET /api/etudiant/{user_id} endpoint
    pub async fn get_student(&self, user_id: UserId) -> anyhow::Result<Option<StudentDetails>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/api/etudiant/{}", self.url, user_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get student {}", error)
        }
    }

    /// Calls GET /api/etudiants endpoint
    pub async fn list_students(&self) -> anyhow::Result<Vec<UserId>> {
        let response = self
            .authorize(self.client.get(format!("{}/api/etudiants", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list students {}", error)
        }
    }

    /// Calls DELETE /api/etudiant/{user_id} endpoint
    /// Returns true if removed and false if refused or unknown
    pub async fn remove_student(&self, user_id: UserId) -> anyhow::Result<bool> {
        let response = self
            .authorize(
                self.client
                    .delete(format!("{}/api/etudiant/{}", self.url, user_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::CONFLICT {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to remove student {}", error)
        }
    }

    /// Calls POST /api/etudiant/{user_id}/emprunt/{book_id} endpoint
    /// Returns the opened loan id, or None if the borrow was refused
    pub async fn borrow_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Option<LoanId>> {
        let response = self
            .authorize(self.client.post(format!(
                "{}/api/etudiant/{}/emprunt/{}",
                self.url, user_id, book_id
            )))
            .send()
            .await?;

        if response.status() == StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to borrow book {}", error)
        }

        let location_header = response
            .headers()
            .get(LOCATION)
            .context("No location header")?;

        let loan_id = location_header
            .to_str()
            .context("Failed to convert header to str")?
            .strip_prefix("/api/emprunt/")
            .context("Invalid location header")?
            .parse()
            .context("Failed to parse loan id")?;
        Ok(Some(loan_id))
    }

    /// Calls POST /api/emprunt/{loan_id}/retour endpoint
    /// Returns true if the loan was closed and false if it already was
    pub async fn return_book(&self, loan_id: LoanId) -> anyhow::Result<bool> {
        let response = self
            .authorize(
                self.client
                    .post(format!("{}/api/emprunt/{}/retour", self.url, loan_id)),
            )
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to return book {}", error)
        }
    }

    /// Calls POST /api/emprunt/{loan_id}/renouvellement endpoint
    /// Returns the new due date, or None if the renewal was refused
    pub async fn renew_loan(&self, loan_id: LoanId) -> anyhow::Result<Option<i64>> {
        let response = self
            .authorize(self.client.post(format!(
                "{}/api/emprunt/{}/renouvellement",
                self.url, loan_id
            )))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            Ok(None)
        } else if response.status().is_success() {
            let renewal: RenewalResponse = response.json().await?;
            Ok(Some(renewal.due_at))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to renew loan {}", error)
        }
    }

    /// Calls GET /api/etudiant/{user_id}/emprunts endpoint
    pub async fn list_active_loans(&self, user_id: UserId) -> anyhow::Result<Vec<ActiveLoan>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/api/etudiant/{}/emprunts", self.url, user_id)),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list loans {}", error)
        }
    }

    /// Calls GET /api/etudiant/{user_id}/historique endpoint
    pub async fn loan_history(&self, user_id: UserId) -> anyhow::Result<Vec<LoanRecord>> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/api/etudiant/{}/historique", self.url, user_id)),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get loan history {}", error)
        }
    }

    /// Calls GET /api/emprunts endpoint
    pub async fn list_all_active_loans(&self) -> anyhow::Result<Vec<ActiveLoan>> {
        let response = self
            .authorize(self.client.get(format!("{}/api/emprunts", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list all loans {}", error)
        }
    }

    /// Calls POST /api/etudiant/{user_id}/reservation/{book_id} endpoint
    /// Returns the queued reservation, or None if the reservation was refused
    pub async fn reserve_book(
        &self,
        user_id: UserId,
        book_id: BookId,
    ) -> anyhow::Result<Option<ReserveResponse>> {
        let response = self
            .authorize(self.client.post(format!(
                "{}/api/etudiant/{}/reservation/{}",
                self.url, user_id, book_id
            )))
            .send()
            .await?;
        if response.status() == StatusCode::FORBIDDEN || response.status() == StatusCode::CONFLICT {
            Ok(None)
        } else if response.status().is_success() {
            Ok(Some(response.json().await?))
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to reserve book {}", error)
        }
    }

    /// Calls DELETE /api/etudiant/{user_id}/reservation/{reservation_id} endpoint
    /// Returns true if cancelled and false if the reservation was not active
    pub async fn cancel_reservation(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
    ) -> anyhow::Result<bool> {
        let response = self
            .authorize(self.client.delete(format!(
                "{}/api/etudiant/{}/reservation/{}",
                self.url, user_id, reservation_id
            )))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else if response.status().is_success() {
            Ok(true)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to cancel reservation {}", error)
        }
    }

    /// Calls GET /api/etudiant/{user_id}/reservations endpoint
    pub async fn list_reservations(
        &self,
        user_id: UserId,
    ) -> anyhow::Result<Vec<ReservationRecord>> {
        let response = self
            .authorize(self.client.get(format!(
                "{}/api/etudiant/{}/reservations",
                self.url, user_id
            )))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to list reservations {}", error)
        }
    }

    /// Calls GET /api/livre/{book_id}/reservations endpoint
    pub async fn queue_for_book(&self, book_id: BookId) -> anyhow::Result<Vec<ReservationRecord>> {
        let response = self
            .authorize(self.client.get(format!(
                "{}/api/livre/{}/reservations",
                self.url, book_id
            )))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error: String = response.json().await.unwrap_or_default();
            bail!("Failed to get queue {}", error)
        }
    }
}
