use crate::ipc::handlers::setup::transport_settings;
use crate::ipc::helpers::{
    get_patch, get_required_date, get_required_str, optional_str, parse_date, require_admin,
    require_principal, required_str, row_exists, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::password;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

struct NewDriver {
    license_number: String,
    experience: i64,
    date_of_birth: String,
    license_expiry_date: String,
    name: String,
    email: String,
    phone_no: String,
    salary: f64,
    address: String,
    gov_id: String,
}

fn parse_experience(v: Option<&Value>) -> Result<i64, HandlerErr> {
    match v.and_then(|v| v.as_i64()) {
        Some(n) if (0..=80).contains(&n) => Ok(n),
        Some(_) => Err(HandlerErr::bad_params("experience must be in 0..=80")),
        None => Err(HandlerErr::bad_params("experience must be integer")),
    }
}

fn parse_new_driver(params: &Value) -> Result<NewDriver, HandlerErr> {
    const REQUIRED: [&str; 10] = [
        "licenseNumber",
        "experience",
        "dateOfBirth",
        "licenseExpiryDate",
        "name",
        "email",
        "phoneNo",
        "salary",
        "address",
        "govId",
    ];
    let missing: Vec<&str> = REQUIRED
        .iter()
        .copied()
        .filter(|k| params.get(*k).map_or(true, |v| v.is_null()))
        .collect();
    if !missing.is_empty() {
        return Err(HandlerErr::bad_params("Please fill all required fields.")
            .with_details(json!({ "missing": missing })));
    }

    let salary = params
        .get("salary")
        .and_then(|v| v.as_f64())
        .filter(|s| *s >= 0.0)
        .ok_or_else(|| HandlerErr::bad_params("salary must be a non-negative number"))?;
    let date_of_birth = get_required_date(params, "dateOfBirth")?;
    let license_expiry_date = get_required_date(params, "licenseExpiryDate")?;

    Ok(NewDriver {
        license_number: get_required_str(params, "licenseNumber")?,
        experience: parse_experience(params.get("experience"))?,
        date_of_birth: date_of_birth.to_string(),
        license_expiry_date: license_expiry_date.to_string(),
        name: get_required_str(params, "name")?,
        email: get_required_str(params, "email")?,
        phone_no: get_required_str(params, "phoneNo")?,
        salary,
        address: get_required_str(params, "address")?,
        gov_id: get_required_str(params, "govId")?,
    })
}

fn ensure_department(conn: &Connection, name: &str) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM departments WHERE name = ?", [name], |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO departments(id, name) VALUES(?, ?)", (&id, name))?;
    Ok(id)
}

fn new_registration_number(conn: &Connection, prefix: &str) -> Result<String, HandlerErr> {
    for _ in 0..5 {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(10)
            .collect::<String>()
            .to_ascii_uppercase();
        let candidate = format!("{}{}", prefix, suffix);
        if !row_exists(
            conn,
            "SELECT 1 FROM drivers WHERE registration_number = ?",
            &candidate,
        )? {
            return Ok(candidate);
        }
    }
    Err(HandlerErr::new(
        "db_insert_failed",
        "could not allocate a unique registration number",
    ))
}

/// Driver with staff record and assigned vehicle filled in. The password hash
/// is never included.
pub fn driver_json(conn: &Connection, driver_id: &str) -> Result<Option<Value>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT d.id, d.registration_number, d.license_number, d.experience,
                    d.date_of_birth, d.license_expiry_date,
                    s.id, s.name, s.email, s.phone_no, s.join_date, s.salary, s.address, s.gov_id,
                    dep.id, dep.name,
                    v.id, v.registration_number, v.vehicle_type
             FROM drivers d
             JOIN staff s ON s.id = d.staff_id
             JOIN departments dep ON dep.id = s.department_id
             LEFT JOIN vehicles v ON v.id = d.assigned_vehicle_id
             WHERE d.id = ?",
            [driver_id],
            |r| {
                let vehicle_id: Option<String> = r.get(16)?;
                let assigned_vehicle = match vehicle_id {
                    Some(id) => json!({
                        "id": id,
                        "registrationNumber": r.get::<_, String>(17)?,
                        "type": r.get::<_, String>(18)?,
                    }),
                    None => Value::Null,
                };
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "registrationNumber": r.get::<_, String>(1)?,
                    "licenseNumber": r.get::<_, String>(2)?,
                    "experience": r.get::<_, i64>(3)?,
                    "dateOfBirth": r.get::<_, String>(4)?,
                    "licenseExpiryDate": r.get::<_, String>(5)?,
                    "staff": {
                        "id": r.get::<_, String>(6)?,
                        "name": r.get::<_, String>(7)?,
                        "email": r.get::<_, String>(8)?,
                        "phoneNo": r.get::<_, String>(9)?,
                        "joinDate": r.get::<_, String>(10)?,
                        "salary": r.get::<_, f64>(11)?,
                        "address": r.get::<_, String>(12)?,
                        "govId": r.get::<_, String>(13)?,
                        "department": {
                            "id": r.get::<_, String>(14)?,
                            "name": r.get::<_, String>(15)?,
                        },
                    },
                    "assignedVehicle": assigned_vehicle,
                }))
            },
        )
        .optional()?)
}

fn drivers_create(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let input = parse_new_driver(&req.params)?;
    let settings = transport_settings(conn)?;

    // Department, staff and driver are written together or not at all.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let department_id = ensure_department(&tx, &settings.department_name).map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "departments" }))
    })?;

    let staff_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO staff(id, name, email, join_date, phone_no, department_id, salary, address, gov_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &staff_id,
            &input.name,
            &input.email,
            Utc::now().date_naive().to_string(),
            &input.phone_no,
            &department_id,
            input.salary,
            &input.address,
            &input.gov_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "staff" })))?;

    let registration_number = new_registration_number(&tx, &settings.driver_id_prefix)?;
    let password_hash = password::hash_password(&registration_number)
        .map_err(|e| HandlerErr::db("password_hash_failed", e))?;
    let driver_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO drivers(
           id, staff_id, license_number, experience, date_of_birth, license_expiry_date,
           registration_number, password_hash, assigned_vehicle_id
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL)",
        (
            &driver_id,
            &staff_id,
            &input.license_number,
            input.experience,
            &input.date_of_birth,
            &input.license_expiry_date,
            &registration_number,
            &password_hash,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "drivers" })))?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    tracing::info!(driver = %driver_id, registration = %registration_number, "driver added");

    let driver = driver_json(conn, &driver_id)?
        .ok_or_else(|| HandlerErr::not_found("Driver not found."))?;
    Ok(json!({ "message": "Driver added successfully.", "driver": driver }))
}

fn drivers_update(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_admin(req)?;
    let driver_id = get_required_str(&req.params, "driverId")?;
    let patch = get_patch(&req.params)?;
    if !row_exists(conn, "SELECT 1 FROM drivers WHERE id = ?", &driver_id)? {
        return Err(HandlerErr::not_found("Driver not found."));
    }

    let mut sets: Vec<&'static str> = Vec::new();
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "licenseNumber" => {
                sets.push("license_number = ?");
                binds.push(required_str(Some(v), k)?.into());
            }
            "experience" => {
                sets.push("experience = ?");
                binds.push(parse_experience(Some(v))?.into());
            }
            "dateOfBirth" | "licenseExpiryDate" => {
                let d = parse_date(&required_str(Some(v), k)?, k)?;
                sets.push(if k == "dateOfBirth" {
                    "date_of_birth = ?"
                } else {
                    "license_expiry_date = ?"
                });
                binds.push(d.to_string().into());
            }
            "assignedVehicleId" => {
                let vehicle_id = optional_str(Some(v), k)?;
                if let Some(id) = &vehicle_id {
                    if !row_exists(conn, "SELECT 1 FROM vehicles WHERE id = ?", id)? {
                        return Err(HandlerErr::not_found("Vehicle not found"));
                    }
                }
                sets.push("assigned_vehicle_id = ?");
                binds.push(match vehicle_id {
                    Some(id) => id.into(),
                    None => rusqlite::types::Value::Null,
                });
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown driver field: {}", k))),
        }
    }

    if !sets.is_empty() {
        binds.push(driver_id.clone().into());
        let sql = format!("UPDATE drivers SET {} WHERE id = ?", sets.join(", "));
        conn.execute(&sql, rusqlite::params_from_iter(binds))
            .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "drivers" })))?;
    }

    let driver = driver_json(conn, &driver_id)?
        .ok_or_else(|| HandlerErr::not_found("Driver not found."))?;
    Ok(json!({ "message": "Driver updated successfully.", "driver": driver }))
}

fn drivers_get(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let driver_id = get_required_str(&req.params, "driverId")?;
    let driver = driver_json(conn, &driver_id)?
        .ok_or_else(|| HandlerErr::not_found("Driver not found."))?;
    Ok(json!({ "driver": driver }))
}

fn drivers_list(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    require_principal(req)?;
    let mut stmt = conn.prepare(
        "SELECT d.id FROM drivers d JOIN staff s ON s.id = d.staff_id ORDER BY s.name, d.id",
    )?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut drivers: Vec<Value> = Vec::with_capacity(ids.len());
    for id in &ids {
        if let Some(d) = driver_json(conn, id)? {
            drivers.push(d);
        }
    }
    Ok(json!({ "drivers": drivers }))
}

/// Credential check for the host's login flow; runs before a principal exists.
fn drivers_verify_password(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let registration_number = get_required_str(&req.params, "registrationNumber")?;
    let Some(candidate) = req.params.get("password").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing password"));
    };
    let stored: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM drivers WHERE registration_number = ?",
            [&registration_number],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let driver_id = match &stored {
        Some((id, hash)) if password::verify_password(candidate, hash) => Some(id.clone()),
        _ => None,
    };
    if driver_id.is_none() {
        tracing::warn!(registration = %registration_number, "driver credential check failed");
    }
    Ok(json!({ "valid": driver_id.is_some(), "driverId": driver_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "drivers.create" => Some(with_db(state, req, drivers_create)),
        "drivers.update" => Some(with_db(state, req, drivers_update)),
        "drivers.get" => Some(with_db(state, req, drivers_get)),
        "drivers.list" => Some(with_db(state, req, drivers_list)),
        "drivers.verifyPassword" => Some(with_db(state, req, drivers_verify_password)),
        _ => None,
    }
}
