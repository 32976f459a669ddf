use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;
use uuid::Uuid;
use validator::ValidationError;

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    lazy_static! {
        static ref SLUG_VALIDATION_RE: Regex = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap();
    }

    // identifiers that parse as uuids are always looked up by id
    if Uuid::parse_str(slug).is_ok() {
        Err(ValidationError {
            code: Cow::from("slug"),
            message: Some(Cow::from("Slug must not look like a store id.")),
            params: HashMap::new(),
        })
    } else if slug.len() <= 63 && SLUG_VALIDATION_RE.is_match(slug) {
        Ok(())
    } else {
        Err(ValidationError {
            code: Cow::from("slug"),
            message: Some(Cow::from(
                "Slug must be at most 63 lowercase letters, digits or single dashes between them.",
            )),
            params: HashMap::new(),
        })
    }
}

pub fn validate_job_type(job_type: &str) -> Result<(), ValidationError> {
    lazy_static! {
        static ref JOB_TYPE_VALIDATION_RE: Regex = Regex::new(r"^[a-z0-9_\-]+(:[a-z0-9_\-]+)*$").unwrap();
    }

    if !job_type.is_empty() && job_type.len() <= 128 && JOB_TYPE_VALIDATION_RE.is_match(job_type) {
        Ok(())
    } else {
        Err(ValidationError {
            code: Cow::from("job_type"),
            message: Some(Cow::from("Job type must look like `namespace:action`.")),
            params: HashMap::new(),
        })
    }
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError {
            code: Cow::from("blank"),
            message: Some(Cow::from("Value must not be blank.")),
            params: HashMap::new(),
        })
    } else {
        Ok(())
    }
}
