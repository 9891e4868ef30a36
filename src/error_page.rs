use crate::{Error, ServerOptions, Status};

/// Produces the body of an error response.
///
/// The engine calls this whenever a response needs a body it does not
/// have: 404 for unhandled requests, 500 for handler errors, 400 for
/// malformed requests. Implementations receive the error and backtrace
/// only when the server captured them.
pub trait ErrorGenerator: Send + Sync + 'static {
    /// Render an error page for `status`.
    fn generate(
        &self,
        status: Status,
        error: Option<&Error>,
        backtrace: Option<&str>,
        options: &ServerOptions,
    ) -> String;
}

/// The default error generator: a minimal html page naming the status
/// code and reason phrase, with the error message and backtrace
/// included only when the corresponding show flags are enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimalErrorGenerator;

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

impl ErrorGenerator for MinimalErrorGenerator {
    fn generate(
        &self,
        status: Status,
        error: Option<&Error>,
        backtrace: Option<&str>,
        options: &ServerOptions,
    ) -> String {
        let code = status as u16;
        let reason = status.canonical_reason();
        let mut page = format!(
            "<html><head><title>{code} {reason}</title></head>\
             <body><h1>{reason}</h1><p>{code} {reason}</p>"
        );

        if options.show_errors {
            if let Some(error) = error {
                page.push_str(&format!("<p>{}</p>", escape_html(&error.to_string())));
            }
        }

        if options.show_backtraces {
            if let Some(backtrace) = backtrace {
                page.push_str(&format!("<pre>{}</pre>", escape_html(backtrace)));
            }
        }

        page.push_str("</body></html>");
        page
    }
}

impl ErrorGenerator for Box<dyn ErrorGenerator> {
    fn generate(
        &self,
        status: Status,
        error: Option<&Error>,
        backtrace: Option<&str>,
        options: &ServerOptions,
    ) -> String {
        self.as_ref().generate(status, error, backtrace, options)
    }
}
