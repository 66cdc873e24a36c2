use uuid::Uuid;

use crate::distribution::LeadCategory;
use crate::followups::FollowUpStage;

use super::LeadData;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub(super) fn new_lead(to: String, category: LeadCategory, lead: &LeadData) -> RenderedEmail {
    let heading = match category {
        LeadCategory::Removals => "New removals lead",
        LeadCategory::Storage => "New storage lead",
    };
    let subject = format!(
        "{heading}: {} to {}",
        lead.starting_address, lead.ending_address
    );

    let mut rows = vec![
        row("Customer", lead.customer_name.as_deref().unwrap_or("Not provided")),
        row("Email", lead.customer_email.as_deref().unwrap_or("Not provided")),
        row("Phone", lead.customer_phone.as_deref().unwrap_or("Not provided")),
        row("From", &lead.starting_address),
        row("To", &lead.ending_address),
    ];
    if let Some(date) = lead.move_date {
        rows.push(row("Move date", &date.format("%d %B %Y").to_string()));
    }
    if let Some(estimate) = lead.summary.estimate {
        rows.push(row("Estimate", &format!("£{estimate:.2}")));
    }
    if let Some(volume) = lead.summary.volume_m3 {
        rows.push(row("Volume", &format!("{volume:.1} m³")));
    }
    if let Some(vans) = lead.summary.van_count {
        rows.push(row("Vans", &vans.to_string()));
    }
    if let Some(movers) = lead.summary.movers {
        rows.push(row("Movers", &movers.to_string()));
    }
    rows.push(row("Charged", &format_pence(lead.price_paid)));

    let html = format!(
        "<h2>{heading}</h2><table>{}</table><p>Reference: {}</p>",
        rows.join(""),
        lead.quote_id
    );
    RenderedEmail { to, subject, html }
}

pub(super) fn follow_up(
    to: String,
    stage: FollowUpStage,
    quote_id: Uuid,
    customer_name: Option<&str>,
    app_url: &str,
) -> RenderedEmail {
    let greeting = match customer_name {
        Some(name) if !name.trim().is_empty() => format!("Hi {},", escape_html(name.trim())),
        _ => "Hi there,".to_string(),
    };
    let link = format!("{app_url}/quotes/{quote_id}");
    let (subject, body) = match stage {
        FollowUpStage::First => (
            "Your moving quote is ready",
            "Your quote is waiting for you. Take a look and let us know if you would like \
             local companies to get in touch.",
        ),
        FollowUpStage::Second => (
            "Still planning your move?",
            "We noticed you have not decided on your quote yet. Prices can change closer to \
             the date, so it is worth securing a company early.",
        ),
    };
    let html = format!(
        "<p>{greeting}</p><p>{body}</p><p><a href=\"{link}\">View your quote</a></p>"
    );
    RenderedEmail {
        to,
        subject: subject.to_string(),
        html,
    }
}

pub(super) fn operator_alert(to: String, subject: &str, body: &str) -> RenderedEmail {
    RenderedEmail {
        to,
        subject: format!("[action needed] {subject}"),
        html: format!("<pre>{}</pre>", escape_html(body)),
    }
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><th align=\"left\">{label}</th><td>{}</td></tr>",
        escape_html(value)
    )
}

fn format_pence(pence: i64) -> String {
    format!("£{}.{:02}", pence / 100, pence % 100)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
