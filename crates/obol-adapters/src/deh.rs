//! DEH (electricity) adapter.

use obol_core::ProviderId;

use crate::{compose_script, ProviderAdapter};

const BODY: &str = r##"
    debug.push({ step: 'navigate', url: 'https://mydei.dei.gr/el/login/' });
    await page.goto('https://mydei.dei.gr/el/login/', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'enter_credentials' });
    await typeInto(
      ['input[name="email"]', 'input[type="email"]', 'input[name="username"]'],
      context.username,
      'username'
    );
    await typeInto(
      ['input[name="password"]', 'input[type="password"]'],
      context.password,
      'password'
    );
    await clickAndWait(['button[type="submit"]', 'input[type="submit"]', '.login-btn'], 'login');
    await rejectIfLoginError(['.error', '.alert-danger', '.login-error', '.validation-summary-errors']);

    debug.push({ step: 'navigate_bills', url: 'https://mydei.dei.gr/el/my-bills/' });
    await page.goto('https://mydei.dei.gr/el/my-bills/', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'extract_structured' });
    let rows = await extractStructured(['.bill-item', '.invoice-row', 'tr.bill', 'table tbody tr', 'li.bill']);

    if (!rows.length) {
      debug.push({ step: 'extract_page_state' });
      rows = await page.evaluate(() => {
        const found = [];
        const visit = (node) => {
          if (!node || typeof node !== 'object') return;
          if (Array.isArray(node)) { node.forEach(visit); return; }
          const amount = node.amount ?? node.totalAmount ?? node.balanceDue;
          const due = node.dueDate ?? node.due_date ?? node.paymentDueDate;
          if (amount !== undefined && due !== undefined) {
            found.push({
              amount: String(amount),
              due_date: String(due),
              reference_number: node.invoiceNumber ? String(node.invoiceNumber) : null
            });
          }
          Object.values(node).forEach(visit);
        };
        for (const el of document.querySelectorAll('#__NEXT_DATA__, script[type="application/json"]')) {
          try { visit(JSON.parse(el.textContent)); } catch (ignored) {}
        }
        return found;
      });
    }

    if (!rows.length) {
      debug.push({ step: 'extract_free_text' });
      rows = await extractFreeText(100000);
    }

    debug.push({ step: 'extract_bills', message: String(rows.length) });
    for (const row of rows) {
      bills.push({ title: 'Λογαριασμός Ρεύματος', bill_type: 'electricity', ...row });
    }
"##;

pub struct DehAdapter;

impl ProviderAdapter for DehAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Deh
    }

    fn default_bill_type(&self) -> &'static str {
        "electricity"
    }

    fn script(&self) -> String {
        compose_script(BODY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_drives_the_mydei_portal() {
        let script = DehAdapter.script();
        assert!(script.contains("mydei.dei.gr/el/login/"));
        assert!(script.contains("mydei.dei.gr/el/my-bills/"));
        assert!(script.contains("Λογαριασμός Ρεύματος"));
    }

    #[test]
    fn login_fields_have_fallback_selector_candidates() {
        let script = DehAdapter.script();
        assert!(script.contains(r#"input[name="email"]"#));
        assert!(script.contains(r#"input[type="email"]"#));
        assert!(script.contains(r#"input[type="password"]"#));
    }
}
