//! Default message content per email type.
//!
//! Used when an entry is queued without an explicit subject or body. `{name}`
//! in a body is replaced with the recipient's name.

use crate::queue::EmailType;

struct Template {
    subject: &'static str,
    body: &'static str,
}

fn template(email_type: EmailType) -> Template {
    match email_type {
        EmailType::Welcome => Template {
            subject: "Welcome aboard, founding member!",
            body: "Dear {name},\n\n\
                   Thank you for joining as one of our founding beta members. \
                   We will be in touch soon with updates and access details.\n\n\
                   Share your feedback any time: https://lawvriksh.com/feedback\n\n\
                   Warmly,\nThe LawVriksh Team\n",
        },
        EmailType::SearchEngine => Template {
            subject: "Our legal content search engine is complete",
            body: "Hello {name},\n\n\
                   The legal content search engine is finished. Founding members \
                   will get access first, so watch your inbox.\n\n\
                   Cheers,\nThe LawVriksh Team\n",
        },
        EmailType::PortfolioBuilder => Template {
            subject: "Your professional digital portfolio awaits",
            body: "Hi {name},\n\n\
                   The digital portfolio builder is complete. Details on building \
                   your portfolio will follow shortly.\n\n\
                   Best regards,\nThe LawVriksh Team\n",
        },
        EmailType::PlatformComplete => Template {
            subject: "The platform is complete: get ready for launch",
            body: "Dear {name},\n\n\
                   Every part of the platform is now ready and we are heading for \
                   launch. Thank you for being a founding member.\n\n\
                   With gratitude,\nThe LawVriksh Team\n",
        },
    }
}

/// Subject and body for `email_type`, addressed to `name`.
pub fn render(email_type: EmailType, name: &str) -> (String, String) {
    let t = template(email_type);
    (t.subject.to_string(), t.body.replace("{name}", name))
}
