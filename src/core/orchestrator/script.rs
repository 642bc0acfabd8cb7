//! Turns a scenario step into runnable k6 source.

use super::types::StepKind;

/// Returns the script a step should run, or `None` when the step has nothing
/// to execute (no script text and no URL).
pub fn resolve_script(kind: &StepKind) -> Option<String> {
    let script = match kind {
        StepKind::Script { script } => script.clone(),
        StepKind::HttpCheck { url, delay_secs } => {
            if url.trim().is_empty() {
                return None;
            }
            http_check_script(url, *delay_secs)
        }
    };
    if script.trim().is_empty() {
        None
    } else {
        Some(script)
    }
}

/// Fixed staged profile: ramp to 10 VUs over 30s, hold for 1m, ramp down over
/// 30s. Each iteration asserts HTTP 200 and sub-second latency.
pub fn http_check_script(url: &str, delay_secs: Option<f64>) -> String {
    let sleep_line = match delay_secs {
        Some(delay) if delay > 0.0 => format!("\n  sleep({});", delay),
        _ => String::new(),
    };
    format!(
        r#"
import http from 'k6/http';
import {{ check, sleep }} from 'k6';

export let options = {{
  stages: [
    {{ duration: '30s', target: 10 }},
    {{ duration: '1m', target: 10 }},
    {{ duration: '30s', target: 0 }},
  ],
}};

export default function() {{
  let response = http.get('{url}');
  check(response, {{
    'status is 200': (r) => r.status === 200,
    'response time < 1000ms': (r) => r.timings.duration < 1000,
  }});{sleep_line}
}}
"#,
        url = escape_js_single_quoted(url.trim()),
        sleep_line = sleep_line,
    )
}

fn escape_js_single_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_step_is_passed_verbatim() {
        let kind = StepKind::Script {
            script: "export default function() {}".to_string(),
        };
        assert_eq!(
            resolve_script(&kind).as_deref(),
            Some("export default function() {}")
        );
    }

    #[test]
    fn empty_steps_resolve_to_nothing() {
        assert!(resolve_script(&StepKind::Script {
            script: "  \n".to_string()
        })
        .is_none());
        assert!(resolve_script(&StepKind::HttpCheck {
            url: String::new(),
            delay_secs: Some(1.0)
        })
        .is_none());
    }

    #[test]
    fn http_check_uses_fixed_profile() {
        let script = resolve_script(&StepKind::HttpCheck {
            url: "https://alpha.example.com/health".to_string(),
            delay_secs: None,
        })
        .unwrap();
        assert!(script.contains("http.get('https://alpha.example.com/health')"));
        assert!(script.contains("{ duration: '30s', target: 10 }"));
        assert!(script.contains("{ duration: '1m', target: 10 }"));
        assert!(script.contains("{ duration: '30s', target: 0 }"));
        assert!(script.contains("r.status === 200"));
        assert!(script.contains("r.timings.duration < 1000"));
        assert!(!script.contains("sleep("));
    }

    #[test]
    fn http_check_appends_delay() {
        let script = http_check_script("http://x", Some(1.5));
        assert!(script.contains("  });\n  sleep(1.5);\n}"));
    }

    #[test]
    fn url_quotes_are_escaped() {
        let script = http_check_script("http://x/?q=it's", None);
        assert!(script.contains("http.get('http://x/?q=it\\'s')"));
    }
}
