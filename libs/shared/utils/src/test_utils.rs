use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::{AppConfig, StoreBackend};
use shared_models::auth::User;

use crate::jwt::sign_claims;

/// Connection settings for tests. The store backend is in-memory and
/// background jobs are off, so handlers run against a local store.
pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "analysis-test-secret-with-enough-entropy-for-hs256".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_role_key: "test-service-role-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: self.supabase_service_role_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            api_port: 0,
            store_backend: StoreBackend::InMemory,
            jobs_enabled: false,
            scheduler_interval_seconds: 60,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// A caller identity for minting tokens. Defaults to a patient, which
/// holds no staff permissions.
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::patient("patient@clinic.test")
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }

    /// Supabase-shaped claims: the application role sits in `app_metadata`.
    fn claims(&self, lifetime: Duration) -> Value {
        let now = Utc::now();
        json!({
            "sub": self.id,
            "email": self.email,
            "role": "authenticated",
            "app_metadata": { "role": self.role },
            "iat": now.timestamp(),
            "exp": (now + lifetime).timestamp()
        })
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let claims = user.claims(Duration::hours(exp_hours.unwrap_or(24)));
        sign_claims(&claims, secret).unwrap_or_default()
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "not-the-configured-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows for the directory tables read during archival.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn patient_response(patient_id: &str, first_name: &str, last_name: &str) -> Value {
        json!({ "id": patient_id, "first_name": first_name, "last_name": last_name })
    }

    pub fn doctor_response(doctor_id: &str, first_name: &str, last_name: &str) -> Value {
        json!({ "id": doctor_id, "first_name": first_name, "last_name": last_name })
    }

    pub fn room_response(room_id: &str, name: &str) -> Value {
        json!({ "id": room_id, "name": name })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({ "message": message, "code": code })
    }
}
