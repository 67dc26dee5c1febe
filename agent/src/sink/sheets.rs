//! Google Sheets transport over the Drive v3 and Sheets v4 REST APIs
//!
//! The credentials file is either a service-account keyfile, exchanged for an
//! access token through the OAuth2 JWT bearer grant when the transport opens,
//! or a plain `{"access_token": ...}` document used as is.

use super::SheetTransport;
use crate::config::SheetConfig;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::Url;
use schema::{AgentError, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const TOKEN_SCOPES: &str = "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Credentials {
    ServiceAccount(ServiceAccountKey),
    Token { access_token: String },
}

/// The fields of a Google service-account keyfile that signing needs
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl Claims {
    fn new(key: &ServiceAccountKey, now: i64) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: TOKEN_SCOPES.to_string(),
            aud: key.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
}

/// RS256-signed assertion for the JWT bearer grant
fn sign_assertion(key: &ServiceAccountKey, now: i64) -> Result<String> {
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| AgentError::transport("authenticate", format!("invalid private key: {}", e)))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &Claims::new(key, now), &signing_key)
        .map_err(|e| AgentError::transport("authenticate", e.to_string()))
}

fn exchange_token(client: &Client, key: &ServiceAccountKey) -> Result<String> {
    let assertion = sign_assertion(key, Utc::now().timestamp())?;
    let response = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .map_err(|e| AgentError::transport("authenticate", e.to_string()))?;
    
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(AgentError::transport("authenticate", format!("HTTP {}: {}", status, body)));
    }
    
    let reply: TokenReply = response
        .json()
        .map_err(|e| AgentError::transport("authenticate", e.to_string()))?;
    debug!("Obtained access token for {}", key.client_email);
    Ok(reply.access_token)
}

pub struct GoogleSheets {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    token: String,
    /// Numeric sheet ids by title, needed for row deletion
    sheet_ids: HashMap<String, i64>,
}

impl GoogleSheets {
    /// Authenticate and locate the spreadsheet by name
    pub fn open(config: &SheetConfig) -> Result<Self> {
        let raw = std::fs::read_to_string(&config.credentials_file)
            .map_err(|e| AgentError::transport("read credentials", e.to_string()))?;
        let credentials: Credentials = serde_json::from_str(&raw)
            .map_err(|e| AgentError::transport("parse credentials", e.to_string()))?;
        
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::transport("build HTTP client", e.to_string()))?;
        
        let token = match credentials {
            Credentials::ServiceAccount(key) => exchange_token(&client, &key)?,
            Credentials::Token { access_token } => access_token,
        };
        
        let mut sheets = Self {
            client,
            api_base: config.api_base.clone(),
            spreadsheet_id: String::new(),
            token,
            sheet_ids: HashMap::new(),
        };
        sheets.spreadsheet_id = sheets.find_spreadsheet(&config.drive_base, &config.spreadsheet_name)?;
        debug!("Opened spreadsheet {:?} ({})", config.spreadsheet_name, sheets.spreadsheet_id);
        
        Ok(sheets)
    }
    
    fn find_spreadsheet(&self, drive_base: &str, name: &str) -> Result<String> {
        let query = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            name.replace('\'', "\\'")
        );
        
        let mut url = endpoint(drive_base, &["files"])?;
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)");
        
        let reply = self.send(self.client.get(url), "open spreadsheet")?;
        reply
            .pointer("/files/0/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::transport("open spreadsheet", format!("spreadsheet {:?} not found", name)))
    }
    
    fn send(&self, request: RequestBuilder, operation: &'static str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| AgentError::transport(operation, e.to_string()))?;
        
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AgentError::transport(operation, format!("HTTP {}: {}", status, body)));
        }
        
        response
            .json::<Value>()
            .map_err(|e| AgentError::transport(operation, e.to_string()))
    }
    
    fn batch_update(&self, request: Value, operation: &'static str) -> Result<Value> {
        let url = endpoint(&self.api_base, &["spreadsheets", &format!("{}:batchUpdate", self.spreadsheet_id)])?;
        self.send(self.client.post(url).json(&json!({ "requests": [request] })), operation)
    }
}

impl SheetTransport for GoogleSheets {
    fn worksheet_titles(&mut self) -> Result<Vec<String>> {
        let mut url = endpoint(&self.api_base, &["spreadsheets", &self.spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        
        let reply = self.send(self.client.get(url), "list worksheets")?;
        
        self.sheet_ids.clear();
        let mut titles = Vec::new();
        for sheet in reply["sheets"].as_array().into_iter().flatten() {
            let properties = &sheet["properties"];
            if let (Some(title), Some(id)) = (properties["title"].as_str(), properties["sheetId"].as_i64()) {
                self.sheet_ids.insert(title.to_string(), id);
                titles.push(title.to_string());
            }
        }
        
        Ok(titles)
    }
    
    fn add_worksheet(&mut self, title: &str, rows: u32, cols: u32) -> Result<()> {
        let request = json!({
            "addSheet": {
                "properties": {
                    "title": title,
                    "gridProperties": { "rowCount": rows, "columnCount": cols }
                }
            }
        });
        
        let reply = self.batch_update(request, "add worksheet")?;
        let sheet_id = reply
            .pointer("/replies/0/addSheet/properties/sheetId")
            .and_then(Value::as_i64)
            .ok_or_else(|| AgentError::transport("add worksheet", format!("unexpected reply: {}", reply)))?;
        
        self.sheet_ids.insert(title.to_string(), sheet_id);
        Ok(())
    }
    
    fn append_row(&mut self, title: &str, row: &[String]) -> Result<Value> {
        let mut url = endpoint(
            &self.api_base,
            &["spreadsheets", &self.spreadsheet_id, "values", &format!("{}:append", a1_sheet(title))],
        )?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        
        self.send(self.client.post(url).json(&json!({ "values": [row] })), "append row")
    }
    
    fn read_values(&mut self, title: &str) -> Result<Vec<Vec<String>>> {
        let url = endpoint(&self.api_base, &["spreadsheets", &self.spreadsheet_id, "values", &a1_sheet(title)])?;
        let reply = self.send(self.client.get(url), "read values")?;
        Ok(values_to_rows(&reply))
    }
    
    fn delete_row(&mut self, title: &str, index: usize) -> Result<()> {
        let sheet_id = *self
            .sheet_ids
            .get(title)
            .ok_or_else(|| AgentError::transport("delete row", format!("unknown worksheet {:?}", title)))?;
        let start = index
            .checked_sub(1)
            .ok_or_else(|| AgentError::transport("delete row", "row index is 1-based"))?;
        
        let request = json!({
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": start,
                    "endIndex": index
                }
            }
        });
        
        self.batch_update(request, "delete row")?;
        Ok(())
    }
}

/// Build `base/segment/...`, percent-encoding each segment
fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| AgentError::transport("build URL", e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| AgentError::transport("build URL", format!("{} cannot be a base", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Whole-sheet A1 range with the title quoted
fn a1_sheet(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn values_to_rows(reply: &Value) -> Vec<Vec<String>> {
    reply["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells.iter()
                                .map(|c| match c.as_str() {
                                    Some(s) => s.to_string(),
                                    None => c.to_string(),
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}
