use crate::models::{Event, OrganizerInfo, UserProfile};
use crate::notify::mailer::OutgoingEmail;

const SIGNATURE: &str = "Event Management Team";

fn format_date(event: &Event) -> String {
    event.date.format("%B %d, %Y at %I:%M %p").to_string()
}

struct Body<'a> {
    heading: &'a str,
    intro: &'a str,
    lines: Vec<(&'a str, String)>,
    closing: &'a str,
}

fn render(recipient: &UserProfile, subject: String, body: Body<'_>) -> OutgoingEmail {
    let name = recipient.greeting_name();

    let mut text = format!("{}\n\nDear {name},\n\n{}\n\n", body.heading, body.intro);
    let mut html = format!(
        "<h2>{}</h2>\n<p>Dear {name},</p>\n<p>{}</p>\n<ul>\n",
        body.heading, body.intro
    );
    for (label, value) in &body.lines {
        text.push_str(&format!("{label}: {value}\n"));
        html.push_str(&format!("    <li><strong>{label}:</strong> {value}</li>\n"));
    }
    text.push_str(&format!("\n{}\n\nBest regards,\n{SIGNATURE}\n", body.closing));
    html.push_str(&format!(
        "</ul>\n<p>{}</p>\n<p>Best regards,<br>{SIGNATURE}</p>\n",
        body.closing
    ));

    OutgoingEmail {
        to: recipient.email.clone(),
        subject,
        text_body: text,
        html_body: html,
    }
}

pub fn registration_confirmed(
    recipient: &UserProfile,
    event: &Event,
    organizer: &OrganizerInfo,
) -> OutgoingEmail {
    render(
        recipient,
        format!("Registration Confirmation: {}", event.title),
        Body {
            heading: "Registration Confirmation",
            intro: "You have successfully registered for the following event:",
            lines: vec![
                ("Event", event.title.clone()),
                ("Date", format_date(event)),
                ("Location", event.location.clone()),
                ("Organizer", organizer.username.clone()),
            ],
            closing: "We look forward to seeing you at the event!",
        },
    )
}

pub fn registration_cancelled(recipient: &UserProfile, event: &Event) -> OutgoingEmail {
    render(
        recipient,
        format!("Registration Cancelled: {}", event.title),
        Body {
            heading: "Registration Cancellation",
            intro: "Your registration for the following event has been cancelled:",
            lines: vec![
                ("Event", event.title.clone()),
                ("Date", format_date(event)),
                ("Location", event.location.clone()),
            ],
            closing: "If you wish to register again, please visit the event page.",
        },
    )
}

pub fn event_reminder(recipient: &UserProfile, event: &Event) -> OutgoingEmail {
    render(
        recipient,
        format!("Event Reminder: {}", event.title),
        Body {
            heading: "Event Reminder",
            intro: "This is a reminder that you are registered for the following event tomorrow:",
            lines: vec![
                ("Event", event.title.clone()),
                ("Date", format_date(event)),
                ("Location", event.location.clone()),
            ],
            closing: "We look forward to seeing you!",
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn event() -> Event {
        let date = Utc.with_ymd_and_hms(2030, 3, 7, 18, 30, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            title: "Rust Meetup".into(),
            description: String::new(),
            date,
            location: "Berlin".into(),
            organizer_id: Uuid::new_v4(),
            max_attendees: None,
            is_active: true,
            created_at: date,
            updated_at: date,
        }
    }

    fn recipient(first_name: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            first_name: first_name.into(),
            last_name: String::new(),
        }
    }

    #[test]
    fn confirmation_mentions_event_and_organizer() {
        let organizer = OrganizerInfo {
            id: Uuid::new_v4(),
            username: "grace".into(),
            email: "grace@example.com".into(),
        };
        let email = registration_confirmed(&recipient("Ada"), &event(), &organizer);

        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Registration Confirmation: Rust Meetup");
        assert!(email.text_body.contains("Dear Ada,"));
        assert!(email.text_body.contains("Date: March 07, 2030 at 06:30 PM"));
        assert!(email.text_body.contains("Organizer: grace"));
        assert!(email.html_body.contains("<strong>Location:</strong> Berlin"));
    }

    #[test]
    fn greeting_falls_back_to_username() {
        let email = registration_cancelled(&recipient(""), &event());
        assert_eq!(email.subject, "Registration Cancelled: Rust Meetup");
        assert!(email.text_body.contains("Dear ada,"));
    }

    #[test]
    fn reminder_subject() {
        let email = event_reminder(&recipient("Ada"), &event());
        assert_eq!(email.subject, "Event Reminder: Rust Meetup");
    }
}
