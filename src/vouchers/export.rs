use crate::models::VoucherLogView;
use chrono::SecondsFormat;
use serde::Serialize;

pub const EXPORT_FILE_NAME: &str = "Voucher Log.csv";

#[derive(Serialize)]
struct ExportRecord<'a> {
    id: String,
    code: &'a str,
    user: &'a str,
    muid: &'a str,
    task: &'a str,
    hashtag: &'a str,
    karma: i32,
    month: &'a str,
    week: &'a str,
    claimed: bool,
    created_by: &'a str,
    created_at: String,
    updated_by: &'a str,
    updated_at: String,
}

impl<'a> From<&'a VoucherLogView> for ExportRecord<'a> {
    fn from(view: &'a VoucherLogView) -> Self {
        Self {
            id: view.id.to_string(),
            code: &view.code,
            user: &view.user,
            muid: &view.muid,
            task: &view.task,
            hashtag: &view.hashtag,
            karma: view.karma,
            month: &view.month,
            week: &view.week,
            claimed: view.claimed,
            created_by: &view.created_by,
            created_at: view.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            updated_by: &view.updated_by,
            updated_at: view.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Serialize vouchers as CSV with a header row.
pub fn vouchers_to_csv(vouchers: &[VoucherLogView]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for voucher in vouchers {
        writer.serialize(ExportRecord::from(voucher))?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn view(code: &str, user: &str) -> VoucherLogView {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        VoucherLogView {
            id: Uuid::nil(),
            code: code.into(),
            user: user.into(),
            muid: "a@x".into(),
            task: "Write a blog".into(),
            hashtag: "#t1".into(),
            karma: 10,
            month: "March".into(),
            week: "1".into(),
            claimed: false,
            created_by: "Admin".into(),
            created_at: at,
            updated_by: "Admin".into(),
            updated_at: at,
        }
    }

    #[test]
    fn writes_header_and_quotes_fields_with_commas() {
        let bytes = vouchers_to_csv(&[view("MU000001", "Nair, Asha")]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some(
                "id,code,user,muid,task,hashtag,karma,month,week,claimed,created_by,created_at,updated_by,updated_at"
            )
        );
        let row = lines.next().unwrap();
        assert!(row.contains("MU000001,\"Nair, Asha\",a@x"));
        assert!(row.contains("2025-03-01T12:00:00Z"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_export_is_empty() {
        assert!(vouchers_to_csv(&[]).unwrap().is_empty());
    }
}
