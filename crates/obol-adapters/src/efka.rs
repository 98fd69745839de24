//! EFKA (social security) adapter: TaxisNet SSO login, then open
//! contribution notices with their coverage periods.

use obol_core::ProviderId;

use crate::taxisnet::TAXISNET_LOGIN;
use crate::{compose_script, ProviderAdapter};

const BODY: &str = r##"
    debug.push({ step: 'navigate_contributions', url: 'https://apps.e-efka.gov.gr/eDebtor/' });
    await page.goto('https://apps.e-efka.gov.gr/eDebtor/', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'extract_structured' });
    let rows = await page.evaluate(() => {
      const amountRe = /(\d{1,3}(?:\.\d{3})*,\d{2}|\d+[.,]\d{2})\s*(?:€|EUR)?/;
      const dateRe = /(\d{1,2}[\/\.\-]\d{1,2}[\/\.\-]\d{4})/g;
      const refRe = /\b(\d{8,20})\b/;
      const rowsOut = [];
      for (const el of document.querySelectorAll('.contribution-row, .notice-row, table tbody tr')) {
        const text = el.innerText || '';
        const amount = text.match(amountRe);
        if (!amount) continue;
        const dates = text.match(dateRe) || [];
        const ref = text.replace(amount[0], ' ').match(refRe);
        rowsOut.push({
          amount: amount[1],
          // A notice row lists the period bounds first and the deadline last.
          period_start: dates.length >= 3 ? dates[0] : null,
          period_end: dates.length >= 3 ? dates[1] : null,
          due_date: dates.length ? dates[dates.length - 1] : null,
          reference_number: ref ? ref[1] : null
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
          const amount = node.amount ?? node.contributionAmount ?? node.balance;
          const due = node.dueDate ?? node.due_date ?? node.paymentDeadline;
          if (amount !== undefined && due !== undefined) {
            found.push({
              amount: String(amount),
              due_date: String(due),
              period_start: node.periodFrom ? String(node.periodFrom) : null,
              period_end: node.periodTo ? String(node.periodTo) : null,
              reference_number: node.noticeNumber ? String(node.noticeNumber) : null
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
      rows = await extractFreeText(100000);
    }

    debug.push({ step: 'extract_bills', message: String(rows.length) });
    for (const row of rows) {
      bills.push({ title: 'Εισφορές ΕΦΚΑ', bill_type: 'social_security', ...row });
    }
"##;

pub struct EfkaAdapter;

impl ProviderAdapter for EfkaAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Efka
    }

    fn default_bill_type(&self) -> &'static str {
        "social_security"
    }

    fn script(&self) -> String {
        compose_script(&[TAXISNET_LOGIN, BODY].concat())
    }
}
