//! EYDAP (water) adapter.

use obol_core::ProviderId;

use crate::{compose_script, ProviderAdapter};

const BODY: &str = r##"
    debug.push({ step: 'navigate', url: 'https://www.eydap.gr/myaccount/' });
    await page.goto('https://www.eydap.gr/myaccount/', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'enter_credentials' });
    await typeInto(
      ['input[name="customerCode"]', '#customerCode', 'input[name="username"]'],
      context.username,
      'username'
    );
    await typeInto(
      ['input[name="password"]', '#password', 'input[type="password"]'],
      context.password,
      'password'
    );
    await clickAndWait(['button[type="submit"]', '.login-btn', 'input[type="submit"]'], 'login');
    await rejectIfLoginError(['.error', '.alert-danger', '.login-error']);

    debug.push({ step: 'extract_structured' });
    let rows = await extractStructured(['.bill-row', '.invoice-item', 'table tbody tr', 'table tr']);

    if (!rows.length) {
      // The account dashboard renders the open balance into known field ids
      // when the bill table is absent.
      debug.push({ step: 'extract_page_state' });
      rows = await page.evaluate(() => {
        const read = (selector) => {
          const el = document.querySelector(selector);
          return el ? (el.textContent || '').trim() : null;
        };
        const amount = read('#billAmount') || read('.account-balance .amount') || read('[data-field="balance"]');
        const due = read('#billDueDate') || read('.account-balance .due-date') || read('[data-field="due-date"]');
        const ref = read('#billReference') || read('[data-field="bill-reference"]');
        if (!amount) return [];
        return [{ amount, due_date: due, reference_number: ref }];
      });
    }

    if (!rows.length) {
      debug.push({ step: 'extract_free_text' });
      rows = await extractFreeText(50000);
    }

    debug.push({ step: 'extract_bills', message: String(rows.length) });
    for (const row of rows) {
      bills.push({ title: 'Λογαριασμός Ύδρευσης', bill_type: 'water', ...row });
    }
"##;

pub struct EydapAdapter;

impl ProviderAdapter for EydapAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Eydap
    }

    fn default_bill_type(&self) -> &'static str {
        "water"
    }

    fn script(&self) -> String {
        compose_script(BODY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_drives_the_eydap_portal() {
        let script = EydapAdapter.script();
        assert!(script.contains("eydap.gr/myaccount"));
        assert!(script.contains("Λογαριασμός Ύδρευσης"));
    }

    #[test]
    fn customer_code_login_has_fallback_candidates() {
        let script = EydapAdapter.script();
        assert!(script.contains(r#"input[name="customerCode"]"#));
        assert!(script.contains("#customerCode"));
    }

    #[test]
    fn dashboard_field_ids_back_up_the_table_scan() {
        let script = EydapAdapter.script();
        assert!(script.contains("#billAmount"));
        assert!(script.contains("#billDueDate"));
    }
}
