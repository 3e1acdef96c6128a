//! Job request parsing

use serde_json::Value;

use crate::error::ValidationError;

/// Wire names of the required fields, in the order they are reported
pub const REQUIRED_FIELDS: [&str; 4] = ["ftpinfo", "password", "uploadDirectory", "composercontent"];

/// Fields that end up on the FTP control connection
const COMMAND_FIELDS: [&str; 3] = ["ftpinfo", "password", "uploadDirectory"];

/// The one message a session accepts
#[derive(Clone)]
pub struct JobRequest {
    /// `user@host[:port]`
    pub ftpinfo: String,
    pub password: String,
    pub upload_directory: String,
    /// Raw manifest text
    pub manifest: String,
    /// CAPTCHA token, when the form collected one
    pub captcha: Option<String>,
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequest")
            .field("ftpinfo", &self.ftpinfo)
            .field("password", &"****")
            .field("upload_directory", &self.upload_directory)
            .field("manifest_len", &self.manifest.len())
            .finish()
    }
}

impl JobRequest {
    /// Parse the raw message and check that every required field is a
    /// non-empty string. Fields sent to the FTP server must be a single line.
    /// The manifest itself is not inspected here.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ValidationError::MalformedRequest(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::MalformedRequest("expected an object".to_string()))?;

        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        };

        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| field(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }
        if let Some(name) = COMMAND_FIELDS
            .iter()
            .copied()
            .find(|name| field(name).is_some_and(|v| v.contains(['\r', '\n'])))
        {
            return Err(ValidationError::LineBreak(name));
        }

        Ok(Self {
            ftpinfo: field("ftpinfo").unwrap_or_default(),
            password: field("password").unwrap_or_default(),
            upload_directory: field("uploadDirectory").unwrap_or_default(),
            manifest: field("composercontent").unwrap_or_default(),
            captcha: field("captcha"),
        })
    }

    /// The manifest must be a JSON object
    pub fn validate_manifest(&self) -> Result<Value, ValidationError> {
        let manifest: Value = serde_json::from_str(&self.manifest)
            .map_err(|e| ValidationError::InvalidManifest(e.to_string()))?;
        if !manifest.is_object() {
            return Err(ValidationError::InvalidManifest("expected an object".to_string()));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(overrides: Value) -> String {
        let mut base = json!({
            "ftpinfo": "deploy@ftp.example.com",
            "password": "hunter2",
            "uploadDirectory": "public_html",
            "composercontent": "{\"require\": {\"monolog/monolog\": \"^3.0\"}}"
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }
        base.to_string()
    }

    #[test]
    fn test_parse_complete_request() {
        let req = JobRequest::parse(&request(json!({"captcha": "tok"}))).unwrap();
        assert_eq!(req.ftpinfo, "deploy@ftp.example.com");
        assert_eq!(req.upload_directory, "public_html");
        assert_eq!(req.captcha.as_deref(), Some("tok"));
        assert!(req.validate_manifest().is_ok());
        assert!(!format!("{:?}", req).contains("hunter2"));
    }

    #[test]
    fn test_missing_and_empty_fields() {
        let err = JobRequest::parse(&request(json!({"password": "", "uploadDirectory": null}))).unwrap_err();
        match err {
            ValidationError::MissingFields(fields) => assert_eq!(fields, vec!["password", "uploadDirectory"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_string_field_counts_as_missing() {
        let err = JobRequest::parse(&request(json!({"ftpinfo": 42}))).unwrap_err();
        assert!(matches!(err, ValidationError::MissingFields(ref f) if f == &vec!["ftpinfo"]));
    }

    #[test]
    fn test_line_breaks_rejected_in_command_fields() {
        let err = JobRequest::parse(&request(json!({"uploadDirectory": "www\r\nDELE index.php"}))).unwrap_err();
        assert!(matches!(err, ValidationError::LineBreak("uploadDirectory")));

        let err = JobRequest::parse(&request(json!({"ftpinfo": "deploy\n@ftp.example.com"}))).unwrap_err();
        assert!(matches!(err, ValidationError::LineBreak("ftpinfo")));

        // The manifest is free-form text
        let req = JobRequest::parse(&request(json!({"composercontent": "{\n  \"require\": {}\n}"}))).unwrap();
        assert!(req.validate_manifest().is_ok());
    }

    #[test]
    fn test_malformed_request() {
        assert!(matches!(JobRequest::parse("not json"), Err(ValidationError::MalformedRequest(_))));
        assert!(matches!(JobRequest::parse("[1, 2]"), Err(ValidationError::MalformedRequest(_))));
    }

    #[test]
    fn test_invalid_manifest() {
        let req = JobRequest::parse(&request(json!({"composercontent": "{\"require\": "}))).unwrap();
        assert!(matches!(req.validate_manifest(), Err(ValidationError::InvalidManifest(_))));

        let req = JobRequest::parse(&request(json!({"composercontent": "[]"}))).unwrap();
        assert!(matches!(req.validate_manifest(), Err(ValidationError::InvalidManifest(_))));
    }
}
