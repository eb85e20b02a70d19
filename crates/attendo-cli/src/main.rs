use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "attendo", about = "Attendo face attendance client")]
struct Cli {
    /// Base URL of the attendod server
    #[arg(long, env = "ATTENDO_SERVER", default_value = "http://localhost:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new face from a photo
    Register {
        /// Person's name
        #[arg(short, long)]
        name: String,
        /// Free-form details (class, roll number, ...)
        #[arg(short, long, default_value = "")]
        details: String,
        /// Photo containing exactly the person's face
        image: PathBuf,
    },
    /// Mark attendance by recognizing the face in a photo
    Mark {
        image: PathBuf,
    },
    /// List registered students
    Students,
    /// Mark attendance for the given student ids without a photo
    Manual {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Show server status
    Status,
}

#[derive(Deserialize)]
struct Student {
    face_id: i64,
    name: String,
    details: String,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn register(&self, name: String, details: String, image: &Path) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .part("faceImage", image_part(image).await?)
            .text("name", name)
            .text("details", details);
        let resp = self.http.post(self.url("/register")).multipart(form).send().await?;
        text_or_error(resp).await
    }

    async fn mark(&self, image: &Path) -> Result<String> {
        let form = reqwest::multipart::Form::new().part("faceImage", image_part(image).await?);
        let resp = self
            .http
            .post(self.url("/mark-attendance"))
            .multipart(form)
            .send()
            .await?;
        text_or_error(resp).await
    }

    async fn students(&self) -> Result<Vec<Student>> {
        let resp = self.http.get(self.url("/students")).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("{status}: {}", resp.text().await.unwrap_or_default());
        }
        Ok(resp.json().await?)
    }

    async fn manual(&self, ids: Vec<i64>) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/manual-attendance"))
            .json(&serde_json::json!({ "studentIds": ids }))
            .send()
            .await?;
        text_or_error(resp).await
    }

    async fn status(&self) -> Result<serde_json::Value> {
        let resp = self.http.get(self.url("/status")).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }
}

async fn image_part(path: &Path) -> Result<reqwest::multipart::Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    Ok(reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(path))?)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

async fn text_or_error(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        bail!("{status}: {body}");
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);
    tracing::debug!(server = %client.base, "using server");

    match cli.command {
        Commands::Register { name, details, image } => {
            println!("{}", client.register(name, details, &image).await?);
        }
        Commands::Mark { image } => {
            println!("{}", client.mark(&image).await?);
        }
        Commands::Students => {
            let students = client.students().await?;
            if students.is_empty() {
                println!("No students registered");
            }
            for s in students {
                println!("{:>6}  {:<24}  {}", s.face_id, s.name, s.details);
            }
        }
        Commands::Manual { ids } => {
            println!("{}", client.manual(ids).await?);
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&client.status().await?)?);
        }
    }

    Ok(())
}
