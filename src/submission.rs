//! Programmatic XML submission to the archive's drop box
//!
//! Builds `PROJECT_SET`, `SAMPLE_SET` and `SUBMISSION_SET` documents, posts
//! them as a multipart form and reads the `RECEIPT` that comes back.

use crate::config::SubmissionConfig;
use crate::error::{Error, Result};
use crate::metadata::SampleList;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use reqwest::multipart::{Form, Part};
use std::fmt::Write as _;
use std::path::Path;

/// Drop-box endpoint of the test service
pub const TEST_ENDPOINT: &str = "https://wwwdev.ebi.ac.uk/ena/submit/drop-box/submit/";

/// Drop-box endpoint of the production service
pub const PRODUCTION_ENDPOINT: &str = "https://www.ebi.ac.uk/ena/submit/drop-box/submit/";

const XML_PROLOG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\" ?>\n";

/// Study (project) registration document
pub fn project_xml(alias: &str, title: &str, description: &str) -> String {
    let mut xml = String::from(XML_PROLOG);
    xml.push_str("<PROJECT_SET>\n");
    let _ = writeln!(xml, "  <PROJECT alias=\"{}\">", escape(alias));
    let _ = writeln!(xml, "    <TITLE>{}</TITLE>", escape(title));
    let _ = writeln!(xml, "    <DESCRIPTION>{}</DESCRIPTION>", escape(description));
    xml.push_str("    <SUBMISSION_PROJECT>\n");
    xml.push_str("      <SEQUENCING_PROJECT/>\n");
    xml.push_str("    </SUBMISSION_PROJECT>\n");
    xml.push_str("  </PROJECT>\n");
    xml.push_str("</PROJECT_SET>\n");
    xml
}

/// Sample registration document
///
/// Every sample alias is prefixed with the list's unique-name prefix, and
/// every sample carries an `ENA-CHECKLIST` attribute naming the list's checklist.
pub fn sample_set_xml(list: &SampleList) -> String {
    let mut xml = String::from(XML_PROLOG);
    xml.push_str("<SAMPLE_SET>\n");
    for sample in &list.samples {
        let alias = format!("{}{}", list.prefix, sample.alias);
        let _ = writeln!(xml, "  <SAMPLE alias=\"{}\">", escape(&alias));
        let _ = writeln!(xml, "    <TITLE>{}</TITLE>", escape(&sample.title));
        xml.push_str("    <SAMPLE_NAME>\n");
        let _ = writeln!(xml, "      <TAXON_ID>{}</TAXON_ID>", escape(&sample.tax_id));
        let _ = writeln!(
            xml,
            "      <SCIENTIFIC_NAME>{}</SCIENTIFIC_NAME>",
            escape(&sample.scientific_name)
        );
        xml.push_str("    </SAMPLE_NAME>\n");
        let _ = writeln!(
            xml,
            "    <DESCRIPTION>{}</DESCRIPTION>",
            escape(&sample.description)
        );
        xml.push_str("    <SAMPLE_ATTRIBUTES>\n");
        let checklist = ("ENA-CHECKLIST", list.checklist_id.as_str());
        let attributes = sample
            .attributes
            .iter()
            .map(|(tag, value)| (tag.as_str(), value.as_str()))
            .chain(std::iter::once(checklist));
        for (tag, value) in attributes {
            xml.push_str("      <SAMPLE_ATTRIBUTE>\n");
            let _ = writeln!(xml, "        <TAG>{}</TAG>", escape(tag));
            let _ = writeln!(xml, "        <VALUE>{}</VALUE>", escape(value));
            xml.push_str("      </SAMPLE_ATTRIBUTE>\n");
        }
        xml.push_str("    </SAMPLE_ATTRIBUTES>\n");
        xml.push_str("  </SAMPLE>\n");
    }
    xml.push_str("</SAMPLE_SET>\n");
    xml
}

/// An action of a submission document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Register the accompanying documents
    Add,
    /// Update previously registered objects
    Modify,
    /// Keep the submission private until a date (`YYYY-MM-DD`)
    Hold {
        /// Release date
        until: String,
    },
    /// Withdraw an object that was never made public
    Cancel {
        /// Accession
        target: String,
    },
    /// Hide a public object
    Suppress {
        /// Accession
        target: String,
    },
    /// Make a held object public now
    Release {
        /// Accession
        target: String,
    },
}

impl Action {
    fn element(&self) -> String {
        match self {
            Action::Add => "<ADD/>".to_string(),
            Action::Modify => "<MODIFY/>".to_string(),
            Action::Hold { until } => format!("<HOLD HoldUntilDate=\"{}\"/>", escape(until)),
            Action::Cancel { target } => format!("<CANCEL target=\"{}\"/>", escape(target)),
            Action::Suppress { target } => format!("<SUPPRESS target=\"{}\"/>", escape(target)),
            Action::Release { target } => format!("<RELEASE target=\"{}\"/>", escape(target)),
        }
    }
}

/// Submission document listing `actions` in order
pub fn submission_xml(actions: &[Action]) -> String {
    let mut xml = String::from(XML_PROLOG);
    xml.push_str("<SUBMISSION_SET>\n");
    xml.push_str("  <SUBMISSION>\n");
    xml.push_str("    <ACTIONS>\n");
    for action in actions {
        xml.push_str("      <ACTION>\n");
        let _ = writeln!(xml, "        {}", action.element());
        xml.push_str("      </ACTION>\n");
    }
    xml.push_str("    </ACTIONS>\n");
    xml.push_str("  </SUBMISSION>\n");
    xml.push_str("</SUBMISSION_SET>\n");
    xml
}

/// An accession assigned in a receipt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accession {
    /// Element name, e.g. `PROJECT`, `SAMPLE`, `SUBMISSION`
    pub object_type: String,
    /// Alias the object was submitted under
    pub alias: Option<String>,
    /// Assigned accession
    pub accession: String,
}

/// Parsed drop-box receipt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Value of the `success` attribute
    pub success: bool,
    /// Accessions, in document order
    pub accessions: Vec<Accession>,
    /// `MESSAGES/ERROR` texts
    pub errors: Vec<String>,
    /// `MESSAGES/INFO` texts
    pub infos: Vec<String>,
}

const ACCESSIONED: &[&[u8]] = &[
    b"PROJECT",
    b"STUDY",
    b"SAMPLE",
    b"EXPERIMENT",
    b"RUN",
    b"ANALYSIS",
    b"SUBMISSION",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Message {
    None,
    Error,
    Info,
}

/// Parse a `RECEIPT` document
pub fn parse_receipt(xml: &str) -> Result<Receipt> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut receipt = Receipt::default();
    let mut seen_root = false;
    let mut message = Message::None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Submission(format!("invalid receipt: {e}")))?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"RECEIPT" => {
                        seen_root = true;
                        receipt.success = attribute(&e, "success")?.as_deref() == Some("true");
                    }
                    b"ERROR" => message = Message::Error,
                    b"INFO" => message = Message::Info,
                    other if ACCESSIONED.contains(&other) => {
                        if let Some(accession) = attribute(&e, "accession")? {
                            receipt.accessions.push(Accession {
                                object_type: String::from_utf8_lossy(other).into_owned(),
                                alias: attribute(&e, "alias")?,
                                accession,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Submission(format!("invalid receipt text: {e}")))?
                    .into_owned();
                match message {
                    Message::Error => receipt.errors.push(text),
                    Message::Info => receipt.infos.push(text),
                    Message::None => {}
                }
            }
            Event::End(_) => message = Message::None,
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(Error::Submission("response is not a RECEIPT document".into()));
    }
    Ok(receipt)
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| Error::Submission(format!("invalid receipt attribute: {e}")))?;
    attr.map(|a| {
        a.unescape_value()
            .map(|v| v.into_owned())
            .map_err(|e| Error::Submission(format!("invalid receipt attribute: {e}")))
    })
    .transpose()
}

/// Client posting documents to the drop box
pub struct SubmissionClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: Option<String>,
}

impl SubmissionClient {
    /// Client for the test or production endpoint, per `config.test`
    pub fn new(
        config: &SubmissionConfig,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let endpoint = if config.test {
            TEST_ENDPOINT
        } else {
            PRODUCTION_ENDPOINT
        };
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            username: username.into(),
            password,
        })
    }

    /// Post to another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Endpoint documents are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post documents as `(kind, path)` pairs and return the receipt body
    ///
    /// Each document becomes a form part named by the upper-cased kind
    /// (`SUBMISSION`, `PROJECT`, `SAMPLE`, ...) carrying the file name of its
    /// path. Submissions are not retried.
    pub async fn submit(&self, documents: &[(&str, &Path)]) -> Result<String> {
        let mut form = Form::new();
        for (kind, path) in documents {
            let content = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.xml", kind.to_lowercase()));
            let part = Part::bytes(content)
                .file_name(file_name)
                .mime_str("application/xml")?;
            form = form.part(kind.to_uppercase(), part);
        }

        tracing::info!(
            endpoint = %self.endpoint,
            documents = documents.len(),
            "Posting submission"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, self.password.as_ref())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(endpoint = %self.endpoint, status = status.as_u16(), "Submission rejected");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        Ok(response.text().await?)
    }
}
