//! AADE (tax authority) adapter: TaxisNet SSO login, then open tax
//! obligations with their payment codes.

use obol_core::ProviderId;

use crate::taxisnet::TAXISNET_LOGIN;
use crate::{compose_script, ProviderAdapter};

const BODY: &str = r##"
    debug.push({ step: 'navigate_obligations', url: 'https://www1.aade.gr/saadeapps2/payments/debts' });
    await page.goto('https://www1.aade.gr/saadeapps2/payments/debts', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'extract_structured' });
    let rows = await page.evaluate(() => {
      const amountRe = /(\d{1,3}(?:\.\d{3})*,\d{2}|\d+[.,]\d{2})\s*(?:€|EUR)?/;
      const dateRe = /(\d{1,2}[\/\.\-]\d{1,2}[\/\.\-]\d{4})/;
      const payRe = /(RF\d{2}[A-Z0-9]{10,23}|\b\d{20,30}\b)/;
      const rowsOut = [];
      for (const el of document.querySelectorAll('.debt-row, .obligation-row, table tbody tr')) {
        const text = el.innerText || '';
        const amount = text.match(amountRe);
        if (!amount) continue;
        const date = text.match(dateRe);
        const pay = text.match(payRe);
        rowsOut.push({
          amount: amount[1],
          due_date: date ? date[1] : null,
          reference_number: pay ? pay[1] : null,
          payment_code: pay ? pay[1] : null
        });
      }
      return rowsOut;
    });

    if (!rows.length) {
      debug.push({ step: 'extract_page_state' });
      rows = await page.evaluate(() => {
        const found = [];
        const visit = (node) => {
          if (!node || typeof node !== 'object') return;
          if (Array.isArray(node)) { node.forEach(visit); return; }
          const amount = node.amount ?? node.debtAmount ?? node.openBalance;
          const due = node.dueDate ?? node.due_date ?? node.deadline;
          if (amount !== undefined && due !== undefined) {
            found.push({
              amount: String(amount),
              due_date: String(due),
              reference_number: node.debtId ? String(node.debtId) : null,
              payment_code: node.paymentCode ? String(node.paymentCode) : null
            });
          }
          Object.values(node).forEach(visit);
        };
        for (const el of document.querySelectorAll('script[type="application/json"]')) {
          try { visit(JSON.parse(el.textContent)); } catch (ignored) {}
        }
        return found;
      });
    }

    if (!rows.length) {
      debug.push({ step: 'extract_free_text' });
      rows = await extractFreeText(1000000);
    }

    debug.push({ step: 'extract_bills', message: String(rows.length) });
    for (const row of rows) {
      bills.push({ title: 'Οφειλή προς ΑΑΔΕ', bill_type: 'tax', ...row });
    }
"##;

pub struct AadeAdapter;

impl ProviderAdapter for AadeAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Aade
    }

    fn default_bill_type(&self) -> &'static str {
        "tax"
    }

    fn script(&self) -> String {
        compose_script(&[TAXISNET_LOGIN, BODY].concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_logs_in_through_taxisnet_before_navigating() {
        let script = AadeAdapter.script();
        let login = script.find("gsis.gr/oauth2server").expect("sso login");
        let debts = script.find("saadeapps2/payments/debts").expect("debts page");
        assert!(login < debts);
    }

    #[test]
    fn second_factor_short_circuits_before_obligations() {
        let script = AadeAdapter.script();
        let otp = script.find("detect_second_factor").unwrap();
        let debts = script.find("navigate_obligations").unwrap();
        assert!(otp < debts);
    }

    #[test]
    fn obligations_carry_payment_codes() {
        let script = AadeAdapter.script();
        assert!(script.contains("payment_code"));
        assert!(script.contains("RF\\d{2}"));
        assert!(script.contains("Οφειλή προς ΑΑΔΕ"));
    }
}
