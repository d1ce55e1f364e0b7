use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use uuid::Uuid;

use crate::auth::{AuthError, AuthResult, AuthState};

const SECURITY_SCHEME_NAME: &str = "BearerAuth";

/// Roles carried in access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Fellow,
    Associate,
}

impl Role {
    pub const VOUCHER_MANAGERS: [Role; 3] = [Role::Admin, Role::Fellow, Role::Associate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admins",
            Role::Fellow => "Fellow",
            Role::Associate => "Associate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub muid: String,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed
            .iter()
            .any(|role| self.roles.iter().any(|held| held == role.as_str()))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => Outcome::Error((err.status(), err)),
        }
    }
}

/// A caller allowed to manage karma vouchers.
#[derive(Debug, Clone)]
pub struct RequireVoucherManager(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireVoucherManager {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) => {
                if user.has_any_role(&Role::VOUCHER_MANAGERS) {
                    Outcome::Success(RequireVoucherManager(user))
                } else {
                    log::debug!("user {} lacks a voucher manager role", user.muid);
                    Outcome::Error((Status::Forbidden, AuthError::Forbidden))
                }
            }
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => Outcome::Error((Status::Unauthorized, AuthError::Unauthorized)),
        }
    }
}

fn bearer_security() -> RequestHeaderInput {
    let scheme = SecurityScheme {
        description: Some("Access token sent as `Authorization: Bearer <token>`.".to_owned()),
        data: SecuritySchemeData::Http {
            scheme: "bearer".to_owned(),
            bearer_format: Some("JWT".to_owned()),
        },
        extensions: Object::default(),
    };
    let mut requirement = SecurityRequirement::new();
    requirement.insert(SECURITY_SCHEME_NAME.to_owned(), Vec::new());
    RequestHeaderInput::Security(SECURITY_SCHEME_NAME.to_owned(), scheme, requirement)
}

impl<'r> OpenApiFromRequest<'r> for AuthUser {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

impl<'r> OpenApiFromRequest<'r> for RequireVoucherManager {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let token = bearer_token_from_request(request)?;

    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let claims = auth_state.jwt_service.decode_access_token(token)?;
    let id: Uuid = claims.sub.parse().map_err(|_| AuthError::TokenInvalid)?;

    Ok(AuthUser {
        id,
        muid: claims.muid,
        roles: claims.roles,
    })
}

fn bearer_token_from_request<'a>(request: &'a Request<'_>) -> AuthResult<&'a str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::Unauthorized)?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Ok(token)
    } else {
        Err(AuthError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[&str]) -> AuthUser {
        AuthUser {
            id: Uuid::nil(),
            muid: "someone@mulearn".into(),
            roles: roles.iter().map(|role| role.to_string()).collect(),
        }
    }

    #[test]
    fn voucher_manager_roles_are_matched_exactly() {
        assert!(user(&["Admins"]).has_any_role(&Role::VOUCHER_MANAGERS));
        assert!(user(&["Student", "Associate"]).has_any_role(&Role::VOUCHER_MANAGERS));
        assert!(!user(&["admins"]).has_any_role(&Role::VOUCHER_MANAGERS));
        assert!(!user(&[]).has_any_role(&Role::VOUCHER_MANAGERS));
    }
}
