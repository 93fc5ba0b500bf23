use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::authz::{roles, Role, Subject};
use crate::errors::AppError;
use crate::models::response::page_window;
use crate::models::user::{DbUser, ProfileUpdateRequest, RegisterRequest, User, UserListQuery, USER_COLUMNS};
use crate::utils::{hash_password, utc_now};

async fn load_roles(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<String>, AppError> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ? ORDER BY r.name",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

async fn hydrate(conn: &mut SqliteConnection, row: DbUser) -> Result<User, AppError> {
    let roles = load_roles(conn, &row.id).await?;
    row.into_user(roles)
}

pub fn subject_for(user: &User) -> Subject {
    Subject::new(user.id, Role::primary(user.roles.iter().map(String::as_str)))
        .with_department(user.department.clone())
}

pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Option<User>, AppError> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<User, AppError> {
    find(pool, id).await?.ok_or_else(|| AppError::not_found("User not found"))
}

/// Account row by username or email, with its password hash.
pub async fn find_credentials(pool: &SqlitePool, login: &str) -> Result<Option<DbUser>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ? OR email = ? LIMIT 1"
    ))
    .bind(login)
    .bind(login)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn user_from_row(pool: &SqlitePool, row: DbUser) -> Result<User, AppError> {
    let mut conn = pool.acquire().await?;
    hydrate(&mut conn, row).await
}

pub async fn touch_login(pool: &SqlitePool, id: Uuid) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

async fn assign_role(conn: &mut SqliteConnection, user_id: Uuid, role: &str) -> Result<(), AppError> {
    let role_id: Option<String> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
        .bind(role)
        .fetch_optional(&mut *conn)
        .await?;
    let role_id = role_id.ok_or_else(|| AppError::internal(format!("{role} role not configured")))?;

    sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id, assigned_at) VALUES (?, ?, ?)")
        .bind(user_id.to_string())
        .bind(role_id)
        .bind(utc_now())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let username = req.username.trim();
    if username.len() < 3 || username.len() > 50 {
        return Err(AppError::bad_request("username must be between 3 and 50 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
        return Err(AppError::bad_request("username may only contain letters, digits, '.', '_' and '-'"));
    }
    let email = req.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(AppError::bad_request("email address is invalid")),
    }
    if req.full_name.trim().is_empty() {
        return Err(AppError::bad_request("full_name is required"));
    }
    Ok(())
}

/// Create an account with the given role. Username and email are unique.
pub async fn create(pool: &SqlitePool, req: RegisterRequest, role: &str) -> Result<User, AppError> {
    validate_registration(&req)?;

    let taken: Option<(String, String)> =
        sqlx::query_as("SELECT username, email FROM users WHERE username = ? OR email = ? LIMIT 1")
            .bind(req.username.trim())
            .bind(req.email.trim())
            .fetch_optional(pool)
            .await?;
    if let Some((username, _)) = taken {
        return Err(if username == req.username.trim() {
            AppError::bad_request("Username already registered")
        } else {
            AppError::bad_request("Email already registered")
        });
    }

    let password_hash = hash_password(&req.password)?;
    let now = utc_now();
    let id = Uuid::new_v4();

    let mut tx = pool.begin().await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, full_name, phone, department, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(req.username.trim())
    .bind(req.email.trim())
    .bind(password_hash)
    .bind(req.full_name.trim())
    .bind(req.phone.as_deref())
    .bind(req.department.as_deref())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await;

    // a concurrent registration can still win the race past the check above
    match inserted {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(if db_err.message().contains("users.username") {
                AppError::bad_request("Username already registered")
            } else {
                AppError::bad_request("Email already registered")
            });
        }
        Err(err) => return Err(err.into()),
    }

    assign_role(&mut tx, id, role).await?;

    let row = sqlx::query_as::<_, DbUser>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id.to_string())
        .fetch_one(&mut *tx)
        .await?;
    let user = hydrate(&mut tx, row).await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, username = %user.username, role, "user created");
    Ok(user)
}

pub async fn register(pool: &SqlitePool, req: RegisterRequest) -> Result<User, AppError> {
    create(pool, req, roles::USER).await
}

/// Create an administrator, or grant ADMIN to an existing account with that username.
pub async fn ensure_admin(pool: &SqlitePool, req: RegisterRequest) -> Result<User, AppError> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
        .bind(req.username.trim())
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(id) => {
            let id = crate::db::row_parsers::parse_uuid(&id)?;
            let mut tx = pool.begin().await?;
            assign_role(&mut tx, id, roles::ADMIN).await?;
            tx.commit().await?;
            get(pool, id).await
        }
        None => create(pool, req, roles::ADMIN).await,
    }
}

pub async fn update_profile(pool: &SqlitePool, id: Uuid, req: ProfileUpdateRequest) -> Result<User, AppError> {
    let current = get(pool, id).await?;
    if matches!(&req.full_name, Some(name) if name.trim().is_empty()) {
        return Err(AppError::bad_request("full_name must not be empty"));
    }

    sqlx::query(
        "UPDATE users SET full_name = ?, phone = ?, department = ?, profile_image_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(req.full_name.as_deref().map(str::trim).unwrap_or(&current.full_name))
    .bind(req.phone.as_deref().or(current.phone.as_deref()))
    .bind(req.department.as_deref().or(current.department.as_deref()))
    .bind(req.profile_image_url.as_deref().or(current.profile_image_url.as_deref()))
    .bind(utc_now())
    .bind(id.to_string())
    .execute(pool)
    .await?;

    get(pool, id).await
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a UserListQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        builder
            .push(" AND (username LIKE ")
            .push_bind(pattern.clone())
            .push(" OR email LIKE ")
            .push_bind(pattern.clone())
            .push(" OR full_name LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = query.role.as_deref().filter(|r| !r.trim().is_empty()) {
        builder
            .push(" AND id IN (SELECT ur.user_id FROM user_roles ur JOIN roles r ON r.id = ur.role_id WHERE r.name = ")
            .push_bind(role.trim().to_uppercase())
            .push(")");
    }
}

pub async fn list(pool: &SqlitePool, query: &UserListQuery) -> Result<(Vec<User>, i64, i64, i64), AppError> {
    let (page, per_page, offset) = page_window(query.page, query.per_page);

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, query);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {USER_COLUMNS} FROM users"));
    push_filters(&mut select, query);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);
    let rows: Vec<DbUser> = select.build_query_as().fetch_all(pool).await?;

    let mut conn = pool.acquire().await?;
    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(hydrate(&mut conn, row).await?);
    }

    Ok((users, total, page, per_page))
}
