use std::fmt::Write;

use super::log::{StepRecord, StepStatus};

pub const REPORT_FILE: &str = "report.html";

const STYLE: &str = r#"
body { font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }
.header { background-color: #333; color: white; padding: 20px; border-radius: 5px; margin-bottom: 20px; }
.step { background-color: white; margin-bottom: 20px; padding: 20px; border-radius: 5px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
.step-header { display: flex; justify-content: space-between; align-items: center; margin-bottom: 10px; }
.command { font-family: 'Courier New', monospace; background-color: #f0f0f0; padding: 10px; border-radius: 3px; margin: 10px 0; }
.success { color: #28a745; font-weight: bold; }
.error { color: #dc3545; font-weight: bold; }
.initial { color: #6c757d; font-weight: bold; }
.screenshots { display: flex; gap: 20px; margin-top: 15px; }
.screenshot-container { flex: 1; text-align: center; }
.screenshot { max-width: 100%; border: 1px solid #ddd; border-radius: 3px; cursor: pointer; }
.screenshot-label { font-weight: bold; margin-bottom: 5px; }
.error-details { background-color: #f8d7da; border: 1px solid #f5c6cb; color: #721c24; padding: 10px; border-radius: 3px; margin-top: 10px; white-space: pre-wrap; font-family: 'Courier New', monospace; font-size: 12px; }
.modal { display: none; position: fixed; z-index: 1000; left: 0; top: 0; width: 100%; height: 100%; background-color: rgba(0,0,0,0.9); }
.modal-content { margin: auto; display: block; max-width: 90%; max-height: 90%; margin-top: 50px; }
.close { position: absolute; top: 15px; right: 35px; color: #f1f1f1; font-size: 40px; font-weight: bold; cursor: pointer; }
"#;

const SCRIPT: &str = r#"
function openModal(src) {
    document.getElementById('imageModal').style.display = 'block';
    document.getElementById('modalImage').src = src;
}
function closeModal() {
    document.getElementById('imageModal').style.display = 'none';
}
"#;

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders the standalone HTML report. Screenshot paths are relative to the
/// report directory, so the folder can be zipped and shared as-is.
pub fn render_report(name: &str, started: &str, steps: &[StepRecord]) -> String {
    let name = escape_html(name);
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{name} - Test Report</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <div class=\"header\">\n<h1>{name} - Test Execution Report</h1>\n<p>Started: {}</p>\n<p>Total Steps: {}</p>\n</div>\n",
        escape_html(started),
        steps.len()
    );

    for step in steps {
        render_step(&mut html, step);
    }

    let _ = write!(
        html,
        "<div id=\"imageModal\" class=\"modal\" onclick=\"closeModal()\">\n<span class=\"close\">&times;</span>\n\
         <img class=\"modal-content\" id=\"modalImage\">\n</div>\n<script>{SCRIPT}</script>\n</body>\n</html>\n"
    );
    html
}

fn render_step(html: &mut String, step: &StepRecord) {
    let (class, label) = match step.status {
        StepStatus::Success => ("success", "SUCCESS"),
        StepStatus::Error => ("error", "ERROR"),
        StepStatus::Initial => ("initial", "INITIAL"),
    };
    let _ = write!(
        html,
        "<div class=\"step\">\n<div class=\"step-header\">\n<h3>Step {}</h3>\n<span class=\"{class}\">{label}</span>\n</div>\n\
         <div class=\"command\">{}</div>\n<small>Timestamp: {}</small>\n",
        step.step,
        escape_html(&step.command),
        escape_html(&step.timestamp)
    );

    if let Some(output) = &step.output {
        let _ = write!(
            html,
            "<div style=\"margin-top: 10px;\"><strong>Output:</strong> {}</div>\n",
            escape_html(output)
        );
    }

    if let Some(error) = &step.error {
        let _ = write!(
            html,
            "<div class=\"error-details\"><strong>Error:</strong> {}\n{}</div>\n",
            escape_html(error),
            escape_html(step.traceback.as_deref().unwrap_or_default())
        );
    }

    if step.before_screenshot.is_some() || step.after_screenshot.is_some() {
        html.push_str("<div class=\"screenshots\">\n");
        for (label, shot) in [
            ("Before", &step.before_screenshot),
            ("After", &step.after_screenshot),
        ] {
            if let Some(file) = shot {
                let _ = write!(
                    html,
                    "<div class=\"screenshot-container\">\n<div class=\"screenshot-label\">{label}</div>\n\
                     <img class=\"screenshot\" src=\"{}\" onclick=\"openModal(this.src)\">\n</div>\n",
                    escape_html(file)
                );
            }
        }
        html.push_str("</div>\n");
    }

    html.push_str("</div>\n");
}
