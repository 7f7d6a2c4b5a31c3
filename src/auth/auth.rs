use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::model::role::Role;
use crate::models::TokenType;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

/// Authenticated caller, threaded explicitly into every protected handler.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Decodes an access token into the caller; refresh tokens are not accepted here.
pub fn authenticate(token: &str, secret: &str) -> Result<AuthUser, AppError> {
    let claims = verify_token(token, secret)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    if claims.token_type != TokenType::Access {
        return Err(AppError::Unauthorized("Access token required".into()));
    }

    let role = Role::from_id(claims.role)
        .ok_or_else(|| AppError::Unauthorized("Invalid role".into()))?;

    Ok(AuthUser {
        user_id: claims.user_id,
        username: claims.sub,
        role,
    })
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // already decoded by the auth middleware
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match bearer_token(req) {
            Some(t) => t,
            None => return ready(Err(AppError::Unauthorized("Missing token".into()))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => return ready(Err(AppError::internal("Config missing"))),
        };

        ready(authenticate(token, &config.jwt_secret))
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin only"))
        }
    }

    pub fn require_superadmin(&self) -> Result<(), AppError> {
        if self.role == Role::SuperAdmin {
            Ok(())
        } else {
            Err(AppError::forbidden("Superadmin only"))
        }
    }

    /// Admins or faculty.
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_admin() || self.role == Role::Faculty {
            Ok(())
        } else {
            Err(AppError::forbidden("Faculty/Admin only"))
        }
    }

    /// The caller themselves, or an admin.
    pub fn require_self_or_admin(&self, user_id: u64) -> Result<(), AppError> {
        if self.user_id == user_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Not allowed to access another user's records"))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::jwt::generate_access_token;

    /// `Authorization` header value for a freshly issued access token.
    pub fn bearer(user_id: u64, role: Role) -> (&'static str, String) {
        let config = Config::for_tests();
        let token = generate_access_token(
            user_id,
            format!("user{user_id}"),
            role.id(),
            &config.jwt_secret,
            600,
        )
        .expect("token");
        ("Authorization", format!("Bearer {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_refresh_token;

    #[test]
    fn refresh_token_cannot_authenticate() {
        let (token, _) = generate_refresh_token(1, "a".into(), 2, "s", 60).unwrap();
        assert!(matches!(
            authenticate(&token, "s"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn role_guards() {
        let student = AuthUser {
            user_id: 9,
            username: "s".into(),
            role: Role::Student,
        };
        assert!(student.require_admin().is_err());
        assert!(student.require_staff().is_err());
        assert!(student.require_self_or_admin(9).is_ok());
        assert!(student.require_self_or_admin(10).is_err());

        let admin = AuthUser {
            role: Role::Admin,
            ..student.clone()
        };
        assert!(admin.require_admin().is_ok());
        assert!(admin.require_superadmin().is_err());
        assert!(admin.require_self_or_admin(10).is_ok());

        let faculty = AuthUser {
            role: Role::Faculty,
            ..student
        };
        assert!(faculty.require_staff().is_ok());
    }
}
