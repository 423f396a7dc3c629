use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.clockface.Attendance1",
    default_service = "org.clockface.Attendance1",
    default_path = "/org/clockface/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    async fn enroll(&self, employee_id: i64, image: &[u8]) -> zbus::Result<()>;
    async fn create_employee(&self, code: &str, name: &str, gender: &str) -> zbus::Result<String>;
    async fn list_employees(&self, active_only: bool) -> zbus::Result<String>;
    async fn set_active(&self, employee_id: i64, active: bool) -> zbus::Result<()>;
    async fn delete_employee(&self, employee_id: i64) -> zbus::Result<bool>;
    async fn assign_shift(
        &self,
        employee_id: i64,
        weekday: u8,
        start: &str,
        end: &str,
    ) -> zbus::Result<String>;
    async fn list_shifts(&self, employee_id: i64) -> zbus::Result<String>;
    async fn history(&self, employee_id: i64, limit: u32) -> zbus::Result<String>;
    async fn daily_summary(&self, window_days: u32) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "clockface", about = "clockface attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage employees
    #[command(subcommand)]
    Employee(EmployeeCommand),
    /// Enroll a face image for an employee
    Enroll {
        #[arg(short, long)]
        employee: i64,
        /// Aligned face crop (JPEG/PNG)
        image: PathBuf,
    },
    /// Recognize a face image and record attendance
    Recognize { image: PathBuf },
    /// Manage weekly shifts
    #[command(subcommand)]
    Shift(ShiftCommand),
    /// Show recent attendance events, newest first
    History {
        #[arg(short, long)]
        employee: Option<i64>,
        /// 0 uses the daemon default
        #[arg(short, long, default_value_t = 0)]
        limit: u32,
    },
    /// Per-day event counts
    Summary {
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum EmployeeCommand {
    Add {
        code: String,
        name: String,
        #[arg(short, long)]
        gender: Option<String>,
    },
    List {
        /// Only employees that take part in matching
        #[arg(long)]
        active: bool,
    },
    Remove { id: i64 },
    Activate { id: i64 },
    Deactivate { id: i64 },
}

#[derive(Subcommand)]
enum ShiftCommand {
    /// Set the shift for one weekday (0 = Monday .. 6 = Sunday)
    Assign {
        #[arg(short, long)]
        employee: i64,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=6))]
        weekday: u8,
        /// Start time, HH:MM
        start: String,
        /// End time, HH:MM
        end: String,
    },
    List {
        #[arg(short, long)]
        employee: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("clockfaced is not reachable")?;
    tracing::debug!(session = cli.session, "connected");

    let json = cli.json;
    match cli.command {
        Commands::Employee(cmd) => match cmd {
            EmployeeCommand::Add { code, name, gender } => {
                let reply = proxy
                    .create_employee(&code, &name, gender.as_deref().unwrap_or(""))
                    .await?;
                emit(json, &reply, |v| {
                    format!("Created employee {} ({})", v["id"], text(&v["code"]))
                })?;
            }
            EmployeeCommand::List { active } => {
                let reply = proxy.list_employees(active).await?;
                emit(json, &reply, |v| rows(v, "No employees", format_employee))?;
            }
            EmployeeCommand::Remove { id } => {
                if proxy.delete_employee(id).await? {
                    println!("Removed employee {id}");
                } else {
                    println!("No employee {id}");
                }
            }
            EmployeeCommand::Activate { id } => {
                proxy.set_active(id, true).await?;
                println!("Employee {id} activated");
            }
            EmployeeCommand::Deactivate { id } => {
                proxy.set_active(id, false).await?;
                println!("Employee {id} deactivated");
            }
        },
        Commands::Enroll { employee, image } => {
            let bytes = read_image(&image)?;
            proxy.enroll(employee, &bytes).await?;
            println!("Enrolled {} for employee {employee}", image.display());
        }
        Commands::Recognize { image } => {
            let bytes = read_image(&image)?;
            let reply = proxy.recognize(&bytes).await?;
            emit(json, &reply, format_report)?;
        }
        Commands::Shift(cmd) => match cmd {
            ShiftCommand::Assign {
                employee,
                weekday,
                start,
                end,
            } => {
                let reply = proxy.assign_shift(employee, weekday, &start, &end).await?;
                emit(json, &reply, format_shift)?;
            }
            ShiftCommand::List { employee } => {
                let reply = proxy.list_shifts(employee).await?;
                emit(json, &reply, |v| rows(v, "No shifts", format_shift))?;
            }
        },
        Commands::History { employee, limit } => {
            let reply = proxy.history(employee.unwrap_or(0), limit).await?;
            emit(json, &reply, |v| rows(v, "No attendance events", format_event))?;
        }
        Commands::Summary { days } => {
            let reply = proxy.daily_summary(days).await?;
            emit(json, &reply, |v| rows(v, "No events in window", format_count))?;
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let v: Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

/// Print a JSON reply either raw or through a formatter.
fn emit(json: bool, reply: &str, format: impl Fn(&Value) -> String) -> Result<()> {
    if json {
        println!("{reply}");
        return Ok(());
    }
    let value: Value = serde_json::from_str(reply).context("malformed reply from daemon")?;
    println!("{}", format(&value));
    Ok(())
}

fn rows(value: &Value, empty: &str, format: fn(&Value) -> String) -> String {
    match value.as_array() {
        Some(items) if !items.is_empty() => {
            items.iter().map(format).collect::<Vec<_>>().join("\n")
        }
        _ => empty.to_string(),
    }
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or("-")
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn format_employee(v: &Value) -> String {
    let state = if v["active"].as_bool().unwrap_or(false) {
        "active"
    } else {
        "inactive"
    };
    format!(
        "{:>5}  {:<10} {:<24} {}",
        v["id"].as_i64().unwrap_or_default(),
        text(&v["code"]),
        text(&v["name"]),
        state
    )
}

fn format_shift(v: &Value) -> String {
    let day = v["weekday"]
        .as_u64()
        .and_then(|i| WEEKDAYS.get(i as usize))
        .copied()
        .unwrap_or("?");
    format!("{day}  {} - {}", text(&v["start"]), text(&v["end"]))
}

fn format_event(v: &Value) -> String {
    let who = if v["is_unknown"].as_bool().unwrap_or(false) {
        "unknown".to_string()
    } else {
        format!("{} {}", text(&v["code"]), text(&v["name"]))
    };
    let late = v["late_minutes"].as_f64().unwrap_or(0.0);
    let late = if late > 0.0 {
        format!("  late {:.0} min", late.ceil())
    } else {
        String::new()
    };
    format!(
        "{}  {:<3} {}{}",
        text(&v["timestamp"]),
        text(&v["check_type"]),
        who,
        late
    )
}

fn format_count(v: &Value) -> String {
    format!(
        "{}  total {:>4}  known {:>4}  unknown {:>4}",
        text(&v["date"]),
        v["total"].as_u64().unwrap_or_default(),
        v["known"].as_u64().unwrap_or_default(),
        v["unknown"].as_u64().unwrap_or_default()
    )
}

fn format_report(v: &Value) -> String {
    let score = v["score"].as_f64().unwrap_or(0.0);
    match v["name"].as_str() {
        Some(name) => format!("{name}: {} (score {score:.3})", text(&v["message"])),
        None => format!("{} (score {score:.3})", text(&v["message"])),
    }
}
