//! Kitsune connector: questions and answers of a Kitsune support site.
//!
//! Questions come from the paginated questions endpoint, oldest update
//! first, 20 per page. Every question is emitted with all of its answers
//! embedded under `answers_data`:
//!
//! ```text
//! GET <url>/api/2/question/?page=N&ordering=updated
//! GET <url>/api/2/answer/?page=M&question=<id>&ordering=updated   (per question)
//! ```
//!
//! # Resuming
//!
//! The `offset` parameter is the number of questions to skip. Whole pages
//! are always requested, so the leading questions of the first page are
//! dropped locally; every question carries its own `offset` so a run can
//! be resumed from the last one seen.
//!
//! A server error (500) on a questions page loses that page: it is logged,
//! counted in the summary extras, and the run moves on to the next page.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::client::{HttpClient, Request};
use crate::error::HttpError;
use crate::models::FetchParams;
use crate::traits::{Connector, ConnectorArgs};

pub const KITSUNE_URL: &str = "https://support.mozilla.org";
pub const CATEGORY_QUESTION: &str = "question";

const FIRST_PAGE: i64 = 1;
const ITEMS_PER_PAGE: i64 = 20;

/// Paging position of a run.
#[derive(Debug)]
struct Cursor {
    page: i64,
    offset: i64,
    drop: i64,
    finished: bool,
}

impl Cursor {
    fn at(offset: i64) -> Self {
        let page = offset / ITEMS_PER_PAGE;
        Self {
            page: FIRST_PAGE + page,
            offset,
            drop: offset - page * ITEMS_PER_PAGE,
            finished: false,
        }
    }
}

pub struct Kitsune {
    url: String,
    api_token: Option<String>,
    cursor: Option<Cursor>,
    total_questions: i64,
    dropped_questions: i64,
}

impl Kitsune {
    pub fn new(args: ConnectorArgs) -> Self {
        let url = if args.url.is_empty() {
            KITSUNE_URL.to_string()
        } else {
            args.url.trim_end_matches('/').to_string()
        };
        Self {
            url,
            api_token: args.api_token,
            cursor: None,
            total_questions: 0,
            dropped_questions: 0,
        }
    }

    fn request(&self, endpoint: &str) -> Request {
        let request = Request::get(format!("{}/api/2/{}/", self.url, endpoint));
        match &self.api_token {
            Some(token) => request.header("Authorization", format!("Token {token}")),
            None => request,
        }
    }

    async fn answers(&self, client: &HttpClient, question_id: &Value) -> Result<Vec<Value>> {
        let mut answers = Vec::new();
        let mut page = FIRST_PAGE;

        loop {
            let request = self
                .request("answer")
                .param("page", page)
                .param("question", question_id.clone())
                .param("ordering", "updated");
            let body = client.fetch(request).await?.json()?;

            let results = body["results"]
                .as_array()
                .with_context(|| format!("Bad JSON format for answers of question {question_id}"))?;
            answers.extend(results.iter().cloned());

            if body["next"].is_null() {
                return Ok(answers);
            }
            page += 1;
        }
    }
}

/// Parse Kitsune's `updated` field. Timestamps without an offset are UTC.
fn parse_updated(value: &str) -> Result<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp_micros() as f64 / 1_000_000.0);
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .with_context(|| format!("Invalid Kitsune date: {value}"))?;
    Ok(naive.and_utc().timestamp_micros() as f64 / 1_000_000.0)
}

#[async_trait]
impl Connector for Kitsune {
    fn name(&self) -> &str {
        "Kitsune"
    }

    fn version(&self) -> &str {
        "0.4.0"
    }

    fn origin(&self) -> &str {
        &self.url
    }

    fn categories(&self) -> &[&'static str] {
        &[CATEGORY_QUESTION]
    }

    fn has_archiving(&self) -> bool {
        true
    }

    fn has_resuming(&self) -> bool {
        true
    }

    fn item_id(&self, item: &Value) -> Option<String> {
        match &item["id"] {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn item_updated_on(&self, item: &Value) -> Result<f64> {
        let updated = item["updated"]
            .as_str()
            .context("Kitsune question without 'updated' field")?;
        parse_updated(updated)
    }

    fn item_category(&self, _item: &Value) -> Result<String> {
        Ok(CATEGORY_QUESTION.to_string())
    }

    fn item_offset(&self, item: &Value) -> Option<i64> {
        item["offset"].as_i64()
    }

    fn summary_extras(&self) -> Option<Value> {
        Some(json!({
            "total_questions": self.total_questions,
            "dropped_questions": self.dropped_questions,
        }))
    }

    async fn next_batch(
        &mut self,
        client: &HttpClient,
        _category: &str,
        params: &FetchParams,
    ) -> Result<Option<Vec<Value>>> {
        if self.cursor.is_none() {
            let offset = params.get("offset").and_then(Value::as_i64).unwrap_or(0);
            info!(url = %self.url, offset, "looking for questions");
            self.cursor = Some(Cursor::at(offset));
        }
        let (page, finished) = match &self.cursor {
            Some(cursor) => (cursor.page, cursor.finished),
            None => return Ok(None),
        };
        if finished {
            info!(
                total = self.total_questions,
                dropped = self.dropped_questions,
                "Kitsune questions fetched"
            );
            return Ok(None);
        }

        let request = self
            .request("question")
            .param("page", page)
            .param("ordering", "updated");

        let body = match client.fetch(request).await {
            Ok(response) => response.json()?,
            Err(e) => match e.downcast_ref::<HttpError>() {
                Some(HttpError::Status { status: 500, .. }) => {
                    error!(
                        page,
                        error = %e,
                        "problem getting Kitsune questions; losing {} questions, going to the next page",
                        ITEMS_PER_PAGE
                    );
                    self.dropped_questions += ITEMS_PER_PAGE;
                    if let Some(cursor) = self.cursor.as_mut() {
                        let offset = cursor.offset + ITEMS_PER_PAGE;
                        cursor.offset = offset;
                        cursor.page = FIRST_PAGE + offset / ITEMS_PER_PAGE;
                    }
                    return Ok(Some(Vec::new()));
                }
                _ => return Err(e),
            },
        };

        let (Some(count), Some(results)) = (body["count"].as_i64(), body["results"].as_array())
        else {
            bail!("Bad JSON format for Kitsune questions page {page}");
        };
        self.total_questions = count;
        let last_page = body["next"].is_null();

        let mut questions = Vec::with_capacity(results.len());
        for question in results {
            if let Some(cursor) = self.cursor.as_mut() {
                if cursor.drop > 0 {
                    cursor.drop -= 1;
                    continue;
                }
            }

            let mut question = question.clone();
            let answers = self.answers(client, &question["id"]).await?;
            if let (Some(cursor), Some(fields)) = (self.cursor.as_mut(), question.as_object_mut()) {
                fields.insert("offset".to_string(), json!(cursor.offset));
                fields.insert("answers_data".to_string(), Value::Array(answers));
                cursor.offset += 1;
            }
            questions.push(question);
        }

        if let Some(cursor) = self.cursor.as_mut() {
            debug!(page, questions = cursor.offset, total = count, "Kitsune questions page done");
            cursor.page += 1;
            cursor.finished = last_page;
        }

        Ok(Some(questions))
    }
}
