//! COSMOTE (telecom) adapter. Two-step login: username first, then password.

use obol_core::ProviderId;

use crate::{compose_script, ProviderAdapter};

const BODY: &str = r##"
    debug.push({ step: 'navigate', url: 'https://account.cosmote.gr/' });
    await page.goto('https://account.cosmote.gr/', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'enter_username' });
    await typeInto(
      ['input[name="username"]', '#username', 'input[type="email"]'],
      context.username,
      'username'
    );
    const next = await firstMatch(['button.next', 'button[type="submit"]']);
    if (next) {
      debug.push({ step: 'advance_to_password', message: next.selector });
      await next.el.click();
      await new Promise((resolve) => setTimeout(resolve, 2000));
    }

    debug.push({ step: 'enter_password' });
    await typeInto(
      ['input[name="password"]', '#password', 'input[type="password"]'],
      context.password,
      'password'
    );
    await clickAndWait(['button[type="submit"]', '.login-submit'], 'login');
    await rejectIfLoginError(['.error', '.alert-danger', '.login-error', '#error-summary']);

    debug.push({ step: 'navigate_bills', url: 'https://my.cosmote.gr/selfcare/jsp/billing.jsp' });
    await page.goto('https://my.cosmote.gr/selfcare/jsp/billing.jsp', { waitUntil: 'networkidle0', timeout: 30000 });

    debug.push({ step: 'extract_structured' });
    let rows = await page.evaluate(() => {
      const rowsOut = [];
      for (const el of document.querySelectorAll('.bill-entry, .invoice-row')) {
        const text = (selector) => {
          const node = el.querySelector(selector);
          return node ? (node.textContent || '').trim() : '';
        };
        const amount = text('.amount');
        if (!amount) continue;
        const isInternet = text('.bill-type').includes('Internet');
        rowsOut.push({
          title: isInternet ? 'Λογαριασμός Internet' : 'Λογαριασμός Κινητής',
          bill_type: isInternet ? 'internet' : 'mobile',
          amount,
          due_date: text('.due-date') || null,
          reference_number: text('.ref-num') || null
        });
      }
      return rowsOut;
    });

    if (!rows.length) {
      rows = await extractStructured(['.bill-entry', '.invoice-row', 'table tbody tr']);
    }

    if (!rows.length) {
      // Billing view is script-rendered; the account state JSON carries the
      // open bills when the DOM widgets have not mounted yet.
      debug.push({ step: 'extract_page_state' });
      rows = await page.evaluate(() => {
        const found = [];
        const visit = (node) => {
          if (!node || typeof node !== 'object') return;
          if (Array.isArray(node)) { node.forEach(visit); return; }
          const amount = node.amount ?? node.totalDue ?? node.openAmount;
          const due = node.dueDate ?? node.due_date ?? node.paymentDue;
          if (amount !== undefined && due !== undefined) {
            found.push({
              amount: String(amount),
              due_date: String(due),
              reference_number: node.billNumber ? String(node.billNumber) : null
            });
          }
          Object.values(node).forEach(visit);
        };
        for (const el of document.querySelectorAll('script[type="application/json"]')) {
          try { visit(JSON.parse(el.textContent)); } catch (ignored) {}
        }
        if (window.__APP_STATE__) visit(window.__APP_STATE__);
        return found;
      });
    }

    if (!rows.length) {
      debug.push({ step: 'extract_free_text' });
      rows = await extractFreeText(10000);
    }

    debug.push({ step: 'extract_bills', message: String(rows.length) });
    for (const row of rows) {
      bills.push({ title: 'Λογαριασμός Κινητής', bill_type: 'mobile', ...row });
    }
"##;

pub struct CosmoteAdapter;

impl ProviderAdapter for CosmoteAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Cosmote
    }

    fn default_bill_type(&self) -> &'static str {
        "mobile"
    }

    fn script(&self) -> String {
        compose_script(BODY)
    }
}
