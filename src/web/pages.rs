//! HTML pages. Deliberately plain; directory values are escaped.

use std::borrow::Cow;
use std::fmt::Write;

use axum::http::StatusCode;

use crate::auth::graph::DirectoryUser;

const QUERY_FORM: &str = r#"<form method="POST" action="/query">
  <p>email: <input name="email" type="text"></p>
  <input type="submit">
</form>"#;

/// Public landing page.
pub fn landing() -> String {
    format!(
        "{}This is a public page. Anyone can see it.<br/>\
         If you have credentials, you can view the protected phone book \
         for your organization <a href='/secure'>here</a>.\
         You can query using this field: {}{}",
        HEAD, QUERY_FORM, TAIL
    )
}

/// The phone book: one block per user, then logout/refresh links.
pub fn phone_book(users: &[DirectoryUser]) -> String {
    let mut html = String::from(HEAD);
    html.push_str("Here is your phone book.<br/><br/>\n");

    if users.is_empty() {
        html.push_str("No matching users.<br/><br/>\n");
    }

    for user in users {
        let field = |value: &Option<String>| escape(value.as_deref().unwrap_or_default()).into_owned();
        // Writing into a String cannot fail
        let _ = write!(
            html,
            "Display Name: {}<br/>\n\
             Given Name: {}<br/>\n\
             Surname: {}<br/>\n\
             Address: {}, {}, {}<br/>\n\
             email Address: {}<br/>\n\
             Telephone: {}<br/>\n\
             mobile: {}<br/>\n\
             Job Title: {}<br/>\n\
             Department: {}<br/>\n\
             <br/><br/>\n",
            field(&user.display_name),
            field(&user.given_name),
            field(&user.surname),
            field(&user.street_address),
            field(&user.city),
            field(&user.country),
            field(&user.mail),
            field(&user.telephone_number),
            field(&user.mobile),
            field(&user.job_title),
            field(&user.department),
        );
    }

    html.push_str(
        "You can log out <a href='/logout'>here</a>.<br/>\
         Or refresh the token <a href='/refresh'>here.</a>",
    );
    html.push_str(TAIL);
    html
}

/// Generic error page.
pub fn error_page(status: StatusCode, message: &str) -> String {
    format!(
        "{}<h1>{} {}</h1><p>{}</p><p><a href='/'>Back to the start page</a></p>{}",
        HEAD,
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error"),
        escape(message),
        TAIL
    )
}

const HEAD: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>Phone book</title></head>\n<body>\n";
const TAIL: &str = "\n</body>\n</html>\n";

fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
