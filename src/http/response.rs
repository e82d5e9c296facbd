//! HTTP/1.1 response assembly: status line, header serialization
//! (pascal-cased per convention, though HTTP header names are
//! case-insensitive), and body framing.

use std::collections::HashMap;

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn set_status_code(&mut self, code: u16, text: &str) -> &mut Self {
        self.status_code = code;
        self.status_text = text.to_string();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = self.to_bytes_headers_only();
        res.extend_from_slice(&self.body);
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut res = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);
        for (key, val) in &self.headers {
            res.push_str(&format!("{}: {}\r\n", Self::to_pascal_case(key), val));
        }
        res.push_str("\r\n");
        res.into_bytes()
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let status_text = match code {
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            _ => "Found",
        };
        let mut res = HttpResponse::new(code, status_text);
        res.set_header("location", target_url)
            .set_header("content-length", "0")
            .set_header("connection", "close");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_includes_status_line_and_body() {
        let mut res = HttpResponse::new(200, "OK");
        res.set_body(b"hi".to_vec(), "text/plain");
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn redirect_sets_location_and_closes_connection() {
        let res = HttpResponse::redirect(302, "/new");
        assert_eq!(res.headers.get("location"), Some(&"/new".to_string()));
        assert_eq!(res.headers.get("connection"), Some(&"close".to_string()));
    }
}
