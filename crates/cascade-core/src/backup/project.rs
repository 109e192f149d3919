//! Project records: name, optional description, and the record tag binding
//! them, all encrypted under the project slice of the master key.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::crypto::CryptoError;
use crate::crypto::cascade;
use crate::keyring::master::SessionSecrets;

use super::record::ABSENT_SENTINEL;

/// A project document as persisted in the remote store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDocument {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub created_at: Option<i64>,
}

/// A decrypted project with its aggregate trust verdict.
#[derive(Debug, Clone)]
pub struct DecryptedProject {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Aggregate verdict over name, description and record tag.
    pub integrity: bool,
}

/// Encrypt a new project record.
///
/// The record tag binds `name ‖ description`; an absent description is
/// stored as the `"none"` sentinel and the tag then binds the name alone —
/// the original records both as `"none"` and skips tag verification, so an
/// explicit sentinel keeps the two document shapes distinguishable from a
/// partially deleted record.
#[instrument(level = "debug", skip_all)]
pub fn encrypt_project_record(
    name: &str,
    description: Option<&str>,
    secrets: &SessionSecrets,
) -> Result<ProjectDocument, CryptoError> {
    let password = secrets.master_key().project_secret();
    let iterations = secrets.project_iterations();

    let description = description.map(str::trim).filter(|d| !d.is_empty());

    let encrypted_name = cascade::encrypt_data(name.as_bytes(), password, iterations)?;

    let (description_field, tag_field) = match description {
        Some(description) => {
            let encrypted_description =
                cascade::encrypt_data(description.as_bytes(), password, iterations)?;
            let mut combined = Vec::with_capacity(name.len() + description.len());
            combined.extend_from_slice(name.as_bytes());
            combined.extend_from_slice(description.as_bytes());
            let tag = cascade::encrypt_reference_tag(&combined, password, iterations)?;
            (
                Some(BASE64.encode(encrypted_description)),
                Some(BASE64.encode(tag)),
            )
        }
        None => (
            Some(ABSENT_SENTINEL.to_owned()),
            Some(ABSENT_SENTINEL.to_owned()),
        ),
    };

    Ok(ProjectDocument {
        name: Some(BASE64.encode(encrypted_name)),
        description: description_field,
        tag: tag_field,
        created_at: None,
    })
}

fn decode_field(encoded: &str) -> Option<Vec<u8>> {
    match BASE64.decode(encoded) {
        Ok(bytes) if !bytes.is_empty() && bytes.len() % 16 == 0 => Some(bytes),
        _ => None,
    }
}

/// Decrypt a project record and compute its aggregate verdict.
///
/// Missing fields (as opposed to the `"none"` sentinel) and any failed
/// decrypt or tag check poison the verdict; a record whose description and
/// tag are both `"none"` is judged on the name alone.
#[instrument(level = "debug", skip_all)]
pub fn decrypt_project_record(
    doc: &ProjectDocument,
    secrets: &SessionSecrets,
) -> Result<DecryptedProject, CryptoError> {
    let password = secrets.master_key().project_secret();
    let iterations = secrets.project_iterations();

    let mut integrity = true;
    let mut name = None;
    let mut name_bytes = None;
    let mut description = None;
    let mut description_bytes = None;

    match doc.name.as_deref().filter(|n| !n.trim().is_empty()) {
        None => integrity = false,
        Some(encoded) => match decode_field(encoded) {
            None => integrity = false,
            Some(ciphertext) => {
                match cascade::decrypt_data(&ciphertext, password, iterations) {
                    Ok((bytes, ok)) => {
                        name = Some(String::from_utf8_lossy(&bytes).into_owned());
                        name_bytes = Some(bytes);
                        integrity = ok;
                    }
                    Err(_) => integrity = false,
                }
            }
        },
    }

    let description_absent = doc.description.as_deref() == Some(ABSENT_SENTINEL);
    match doc.description.as_deref() {
        None => integrity = false,
        Some(ABSENT_SENTINEL) => {}
        Some(encoded) if encoded.trim().is_empty() => {}
        Some(encoded) => match decode_field(encoded) {
            None => integrity = false,
            Some(ciphertext) => {
                match cascade::decrypt_data(&ciphertext, password, iterations) {
                    Ok((bytes, ok)) => {
                        description = Some(String::from_utf8_lossy(&bytes).into_owned());
                        description_bytes = Some(bytes);
                        integrity = integrity && ok;
                    }
                    Err(_) => integrity = false,
                }
            }
        },
    }

    match doc.tag.as_deref() {
        None => {
            if !description_absent {
                integrity = false;
            }
        }
        Some(ABSENT_SENTINEL) => {}
        Some(encoded) if encoded.trim().is_empty() => {}
        Some(encoded) => match decode_field(encoded) {
            None => integrity = false,
            Some(ciphertext) => {
                if let (Some(name_bytes), Some(description_bytes)) =
                    (&name_bytes, &description_bytes)
                {
                    let mut combined =
                        Vec::with_capacity(name_bytes.len() + description_bytes.len());
                    combined.extend_from_slice(name_bytes);
                    combined.extend_from_slice(description_bytes);
                    let ok = cascade::verify_reference_tag(
                        &ciphertext,
                        password,
                        iterations,
                        &combined,
                    )
                    .unwrap_or(false);
                    integrity = integrity && ok;
                }
            }
        },
    }

    // A record missing any field outright can never be trusted.
    if doc.name.is_none() || doc.description.is_none() || doc.tag.is_none() {
        integrity = false;
    }

    Ok(DecryptedProject {
        name,
        description,
        integrity,
    })
}
